//! Slideshow timeline and filter graph.

use std::fmt::Write;

use reelforge_common::{TaskParams, Transition};

/// Geometry and timing of a slideshow with `count` images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideshowLayout {
    pub count: usize,
    /// Seconds each image is shown.
    pub image_duration: f64,
    /// Seconds each cross-fade overlaps its neighbours.
    pub transition_duration: f64,
    pub transition: Transition,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl SlideshowLayout {
    pub fn from_params(params: &TaskParams, count: usize) -> Self {
        let (width, height) = params.slideshow_size();
        Self {
            count,
            image_duration: params.image_duration(),
            transition_duration: params.transition_duration(),
            transition: params.transition(),
            width,
            height,
            fps: params.fps(),
        }
    }

    /// Total length of the video stream in seconds.
    ///
    /// Cross-fades overlap neighbours, so each one shortens the timeline by
    /// one transition length: `N·D − (N−1)·T`.
    pub fn timeline(&self) -> f64 {
        let n = self.count as f64;
        match self.transition {
            Transition::None => n * self.image_duration,
            Transition::Fade if self.count > 1 => {
                n * self.image_duration - (n - 1.0) * self.transition_duration
            }
            Transition::Fade => n * self.image_duration,
        }
    }

    /// Start time of the cross-fade that brings in image `k` (k ≥ 1).
    ///
    /// The chain joining images `0..=k` is `k·D − (k−1)·T` long and the fade
    /// begins one transition before its end.
    pub fn offset(&self, k: usize) -> f64 {
        let k = k as f64;
        (k * self.image_duration - (k - 1.0) * self.transition_duration)
            - self.transition_duration
    }

    fn segment(&self, index: usize, label: &str) -> String {
        format!(
            "[{index}:v]scale={}:{},setsar=1,fps={},settb=AVTB[{label}]",
            self.width, self.height, self.fps
        )
    }

    /// Render the `-filter_complex` value. Output label is `[v]`.
    pub fn filter_graph(&self) -> String {
        if self.count == 1 {
            return self.segment(0, "v");
        }

        let mut graph = String::new();
        for i in 0..self.count {
            graph.push_str(&self.segment(i, &format!("v{i}")));
            graph.push(';');
        }

        match self.transition {
            Transition::None => {
                for i in 0..self.count {
                    let _ = write!(graph, "[v{i}]");
                }
                let _ = write!(graph, "concat=n={}:v=1:a=0[v]", self.count);
            }
            Transition::Fade => {
                for k in 1..self.count {
                    let input = if k == 1 {
                        "v0".to_string()
                    } else {
                        format!("vt{}", k - 1)
                    };
                    let output = if k == self.count - 1 {
                        "v".to_string()
                    } else {
                        format!("vt{k}")
                    };
                    let _ = write!(
                        graph,
                        "[{input}][v{k}]xfade=transition=fade:duration={:.2}:offset={:.2}[{output}]",
                        self.transition_duration,
                        self.offset(k)
                    );
                    if k < self.count - 1 {
                        graph.push(';');
                    }
                }
            }
        }

        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(count: usize, transition: Transition) -> SlideshowLayout {
        SlideshowLayout {
            count,
            image_duration: 3.0,
            transition_duration: 0.5,
            transition,
            width: 1280,
            height: 720,
            fps: 25,
        }
    }

    #[test]
    fn test_timeline() {
        assert_eq!(layout(3, Transition::Fade).timeline(), 8.0);
        assert_eq!(layout(3, Transition::None).timeline(), 9.0);
        assert_eq!(layout(1, Transition::Fade).timeline(), 3.0);
    }

    #[test]
    fn test_offsets() {
        let l = layout(4, Transition::Fade);
        assert_eq!(l.offset(1), 2.5);
        assert_eq!(l.offset(2), 5.0);
        assert_eq!(l.offset(3), 7.5);
    }

    #[test]
    fn test_single_image_maps_straight_to_output() {
        assert_eq!(
            layout(1, Transition::Fade).filter_graph(),
            "[0:v]scale=1280:720,setsar=1,fps=25,settb=AVTB[v]"
        );
        assert_eq!(
            layout(1, Transition::None).filter_graph(),
            "[0:v]scale=1280:720,setsar=1,fps=25,settb=AVTB[v]"
        );
    }

    #[test]
    fn test_concat_graph() {
        assert_eq!(
            layout(2, Transition::None).filter_graph(),
            "[0:v]scale=1280:720,setsar=1,fps=25,settb=AVTB[v0];\
             [1:v]scale=1280:720,setsar=1,fps=25,settb=AVTB[v1];\
             [v0][v1]concat=n=2:v=1:a=0[v]"
        );
    }

    #[test]
    fn test_two_image_fade() {
        let graph = layout(2, Transition::Fade).filter_graph();
        assert!(graph.ends_with("[v0][v1]xfade=transition=fade:duration=0.50:offset=2.50[v]"));
    }

    #[test]
    fn test_fade_chain() {
        let graph = layout(3, Transition::Fade).filter_graph();
        assert_eq!(
            graph,
            "[0:v]scale=1280:720,setsar=1,fps=25,settb=AVTB[v0];\
             [1:v]scale=1280:720,setsar=1,fps=25,settb=AVTB[v1];\
             [2:v]scale=1280:720,setsar=1,fps=25,settb=AVTB[v2];\
             [v0][v1]xfade=transition=fade:duration=0.50:offset=2.50[vt1];\
             [vt1][v2]xfade=transition=fade:duration=0.50:offset=5.00[v]"
        );
    }

    #[test]
    fn test_layout_from_params_defaults() {
        let l = SlideshowLayout::from_params(&TaskParams::default(), 2);
        assert_eq!((l.width, l.height, l.fps), (1280, 720, 25));
        assert_eq!(l.transition, Transition::Fade);
        assert_eq!(l.image_duration, 3.0);
        assert_eq!(l.transition_duration, 0.5);
    }
}
