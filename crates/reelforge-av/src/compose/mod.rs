//! Mapping semantic task parameters to an ffmpeg argument vector.
//!
//! The argument order produced here is relied on by operators reading the
//! stored command lines, so it is fixed per kind:
//!
//! - image + audio: inputs, codecs, rate, optional scale, loop/shortest, output
//! - slideshow: one timed looped input per image, optional audio, the filter
//!   graph, maps, codecs, output
//!
//! Every path-like parameter is resolved through an [`InputFetcher`]; the
//! downloaded copies are owned by the returned [`BuiltCommand`].

mod graph;

pub use graph::SlideshowLayout;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelforge_common::{TaskKind, TaskParams};

use crate::fetch::InputFetcher;
use crate::probe::MediaProber;
use crate::scratch::ScratchFiles;
use crate::{Error, Result};

/// A ready-to-run encoder invocation.
#[derive(Debug)]
pub struct BuiltCommand {
    /// Arguments, without the program name.
    pub args: Vec<String>,
    /// Expected number of output frames.
    pub total_frames: u64,
    /// Downloaded inputs; removed when this is dropped.
    pub scratch: ScratchFiles,
}

/// `round(duration × fps)`.
pub fn total_frames(duration: f64, fps: u32) -> u64 {
    (duration * f64::from(fps)).round().max(0.0) as u64
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Builds encoder commands for every task kind.
#[derive(Clone)]
pub struct CommandBuilder {
    fetcher: Arc<dyn InputFetcher>,
    prober: Arc<dyn MediaProber>,
}

impl CommandBuilder {
    pub fn new(fetcher: Arc<dyn InputFetcher>, prober: Arc<dyn MediaProber>) -> Self {
        Self { fetcher, prober }
    }

    /// Build the command that renders `params` into `output`.
    ///
    /// On error, any inputs already downloaded are removed before returning.
    pub async fn build(
        &self,
        kind: TaskKind,
        params: &TaskParams,
        output: &Path,
    ) -> Result<BuiltCommand> {
        match kind {
            TaskKind::ImageAudioToVideo => self.image_audio(params, output).await,
            TaskKind::ImageSlideshow => self.slideshow(params, output).await,
        }
    }

    async fn fetch(&self, reference: &str, scratch: &mut ScratchFiles) -> Result<PathBuf> {
        let fetched = self.fetcher.fetch(reference).await?;
        scratch.record(&fetched);
        Ok(fetched.path().to_path_buf())
    }

    async fn image_audio(&self, params: &TaskParams, output: &Path) -> Result<BuiltCommand> {
        let image = params
            .image_path()
            .ok_or_else(|| Error::InvalidInput("image_path is required".into()))?;
        let audio = params
            .audio_path()
            .ok_or_else(|| Error::InvalidInput("audio_path is required".into()))?;

        let mut scratch = ScratchFiles::new(self.fetcher.scratch_dir());
        let image = self.fetch(image, &mut scratch).await?;
        let audio = self.fetch(audio, &mut scratch).await?;

        let duration = self.prober.audio_duration(&audio).await?;
        let fps = params.fps();

        let mut args: Vec<String> = vec![
            "-loglevel".into(),
            "info".into(),
            "-stats".into(),
            "-loop".into(),
            "1".into(),
            "-i".into(),
            path_arg(&image),
            "-i".into(),
            path_arg(&audio),
            "-c:v".into(),
            params.video_codec().into(),
            "-preset".into(),
            "ultrafast".into(),
            "-c:a".into(),
            params.audio_codec().into(),
            "-b:v".into(),
            params.video_bitrate().into(),
            "-b:a".into(),
            params.audio_bitrate().into(),
            "-r".into(),
            fps.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ];

        if let Some((w, h)) = params.size() {
            args.push("-vf".into());
            args.push(format!("scale={w}:{h}"));
        }

        if params.audio_loop {
            args.extend([String::from("-stream_loop"), "-1".into()]);
        } else {
            args.push("-shortest".into());
        }

        args.extend([
            String::from("-f"),
            params.output_format().into(),
            "-y".into(),
            path_arg(output),
        ]);

        Ok(BuiltCommand {
            args,
            total_frames: total_frames(duration, fps),
            scratch,
        })
    }

    async fn slideshow(&self, params: &TaskParams, output: &Path) -> Result<BuiltCommand> {
        let references = params.slideshow_images();
        if references.is_empty() {
            return Err(Error::InvalidInput("no images provided".into()));
        }

        let mut scratch = ScratchFiles::new(self.fetcher.scratch_dir());
        let mut images = Vec::with_capacity(references.len());
        for reference in references {
            images.push(self.fetch(reference, &mut scratch).await?);
        }

        let audio = match params.background_audio() {
            Some(reference) => Some(self.fetch(reference, &mut scratch).await?),
            None => None,
        };
        let audio_duration = match &audio {
            Some(path) => Some(self.prober.audio_duration(path).await?),
            None => None,
        };

        let layout = SlideshowLayout::from_params(params, images.len());
        let duration = audio_duration
            .filter(|d| *d > 0.0)
            .unwrap_or_else(|| layout.timeline());

        let mut args: Vec<String> = vec!["-loglevel".into(), "info".into(), "-stats".into()];
        let segment = format!("{:.2}", layout.image_duration);
        for image in &images {
            args.extend([
                String::from("-loop"),
                "1".into(),
                "-t".into(),
                segment.clone(),
                "-i".into(),
                path_arg(image),
            ]);
        }
        if let Some(audio) = &audio {
            args.extend([String::from("-i"), path_arg(audio)]);
        }

        args.extend([
            String::from("-filter_complex"),
            layout.filter_graph(),
            "-map".into(),
            "[v]".into(),
        ]);
        if audio.is_some() {
            args.extend([String::from("-map"), format!("{}:a", images.len())]);
        }

        args.extend([
            String::from("-c:v"),
            params.video_codec().into(),
            "-preset".into(),
            "ultrafast".into(),
            "-b:v".into(),
            params.video_bitrate().into(),
            "-r".into(),
            layout.fps.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ]);
        if audio.is_some() {
            args.extend([
                String::from("-c:a"),
                params.audio_codec().into(),
                "-b:a".into(),
                params.audio_bitrate().into(),
                "-shortest".into(),
            ]);
        }

        args.extend([
            String::from("-f"),
            params.output_format().into(),
            "-y".into(),
            path_arg(output),
        ]);

        Ok(BuiltCommand {
            args,
            total_frames: total_frames(duration, layout.fps),
            scratch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Fetched;
    use crate::probe::MediaInfo;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reelforge_common::TaskParams;

    /// Treats `http://` references as downloads into the scratch dir.
    struct FakeFetcher {
        dir: tempfile::TempDir,
        fail_on: Option<&'static str>,
        fetched: Mutex<Vec<PathBuf>>,
    }

    impl FakeFetcher {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                fail_on: None,
                fetched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl InputFetcher for FakeFetcher {
        async fn fetch(&self, reference: &str) -> Result<Fetched> {
            if self.fail_on == Some(reference) {
                return Err(Error::download(reference, "status 404"));
            }
            match reference.strip_prefix("http://cdn/") {
                Some(name) => {
                    let path = self.dir.path().join(name);
                    std::fs::write(&path, b"media").unwrap();
                    self.fetched.lock().push(path.clone());
                    Ok(Fetched::Downloaded(path))
                }
                None => Ok(Fetched::Local(PathBuf::from(reference))),
            }
        }

        fn scratch_dir(&self) -> &Path {
            self.dir.path()
        }
    }

    struct FixedDuration(f64);

    #[async_trait]
    impl MediaProber for FixedDuration {
        async fn probe(&self, _path: &Path) -> Result<MediaInfo> {
            Ok(MediaInfo::default())
        }

        async fn validate(&self, _reference: &str) -> Result<()> {
            Ok(())
        }

        async fn audio_duration(&self, _path: &Path) -> Result<f64> {
            Ok(self.0)
        }
    }

    fn builder(fetcher: Arc<FakeFetcher>, duration: f64) -> CommandBuilder {
        CommandBuilder::new(fetcher, Arc::new(FixedDuration(duration)))
    }

    #[test]
    fn test_total_frames_rounds() {
        assert_eq!(total_frames(10.0, 25), 250);
        assert_eq!(total_frames(8.0, 25), 200);
        assert_eq!(total_frames(3.33, 30), 100);
        assert_eq!(total_frames(0.0, 25), 0);
    }

    #[tokio::test]
    async fn test_image_audio_argument_order() {
        let params = TaskParams {
            image_path: Some("cat.jpg".into()),
            audio_path: Some("song.mp3".into()),
            ..Default::default()
        };
        let built = builder(Arc::new(FakeFetcher::new()), 10.0)
            .build(TaskKind::ImageAudioToVideo, &params, Path::new("/out/t.mp4"))
            .await
            .unwrap();

        assert_eq!(built.total_frames, 250);
        assert_eq!(
            built.args.join(" "),
            "-loglevel info -stats -loop 1 -i cat.jpg -i song.mp3 -c:v libx264 \
             -preset ultrafast -c:a aac -b:v 1M -b:a 128k -r 25 -pix_fmt yuv420p \
             -shortest -f mp4 -y /out/t.mp4"
        );
        assert!(built.scratch.is_empty());
    }

    #[tokio::test]
    async fn test_image_audio_scale_and_loop() {
        let params = TaskParams {
            image_path: Some("cat.jpg".into()),
            audio_path: Some("song.mp3".into()),
            width: Some(640),
            height: Some(360),
            audio_loop: true,
            fps: Some(30),
            ..Default::default()
        };
        let built = builder(Arc::new(FakeFetcher::new()), 2.0)
            .build(TaskKind::ImageAudioToVideo, &params, Path::new("o.mp4"))
            .await
            .unwrap();

        let line = built.args.join(" ");
        assert!(line.contains("-pix_fmt yuv420p -vf scale=640:360 -stream_loop -1 -f mp4"));
        assert!(!line.contains("-shortest"));
        assert_eq!(built.total_frames, 60);
    }

    #[tokio::test]
    async fn test_single_dimension_does_not_scale() {
        let params = TaskParams {
            image_path: Some("cat.jpg".into()),
            audio_path: Some("song.mp3".into()),
            width: Some(640),
            ..Default::default()
        };
        let built = builder(Arc::new(FakeFetcher::new()), 1.0)
            .build(TaskKind::ImageAudioToVideo, &params, Path::new("o.mp4"))
            .await
            .unwrap();
        assert!(!built.args.contains(&"-vf".to_string()));
    }

    #[tokio::test]
    async fn test_image_audio_requires_both_inputs() {
        let params = TaskParams {
            image_path: Some("cat.jpg".into()),
            ..Default::default()
        };
        let result = builder(Arc::new(FakeFetcher::new()), 1.0)
            .build(TaskKind::ImageAudioToVideo, &params, Path::new("o.mp4"))
            .await;
        assert_matches!(result, Err(Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_slideshow_without_audio() {
        let params = TaskParams {
            image_paths: vec!["a.jpg".into(), "b.jpg".into(), "c.jpg".into()],
            ..Default::default()
        };
        let built = builder(Arc::new(FakeFetcher::new()), 99.0)
            .build(TaskKind::ImageSlideshow, &params, Path::new("s.mp4"))
            .await
            .unwrap();

        // 3 x 3.0s with two 0.5s fades
        assert_eq!(built.total_frames, 200);

        let line = built.args.join(" ");
        assert!(line.starts_with(
            "-loglevel info -stats -loop 1 -t 3.00 -i a.jpg -loop 1 -t 3.00 -i b.jpg \
             -loop 1 -t 3.00 -i c.jpg -filter_complex "
        ));
        assert!(line.ends_with(
            "-map [v] -c:v libx264 -preset ultrafast -b:v 1M -r 25 -pix_fmt yuv420p \
             -f mp4 -y s.mp4"
        ));
        assert!(!line.contains("-c:a"));
    }

    #[tokio::test]
    async fn test_slideshow_with_background_audio() {
        let params = TaskParams {
            image_paths: vec!["a.jpg".into(), "b.jpg".into()],
            background_audio: Some("music.mp3".into()),
            transition_type: Some("none".into()),
            ..Default::default()
        };
        let built = builder(Arc::new(FakeFetcher::new()), 12.0)
            .build(TaskKind::ImageSlideshow, &params, Path::new("s.mp4"))
            .await
            .unwrap();

        // Audio length wins over the 6s timeline
        assert_eq!(built.total_frames, 300);

        let line = built.args.join(" ");
        assert!(line.contains("-i b.jpg -i music.mp3 -filter_complex"));
        assert!(line.contains("concat=n=2:v=1:a=0[v] -map [v] -map 2:a -c:v"));
        assert!(line.contains("-c:a aac -b:a 128k -shortest -f mp4"));
    }

    #[tokio::test]
    async fn test_slideshow_needs_images() {
        let params = TaskParams {
            image_paths: vec!["".into()],
            ..Default::default()
        };
        let result = builder(Arc::new(FakeFetcher::new()), 1.0)
            .build(TaskKind::ImageSlideshow, &params, Path::new("s.mp4"))
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("no images provided"));
    }

    #[tokio::test]
    async fn test_downloads_are_owned_by_command() {
        let fetcher = Arc::new(FakeFetcher::new());
        let params = TaskParams {
            image_paths: vec!["http://cdn/a.jpg".into(), "local.jpg".into()],
            ..Default::default()
        };
        let built = builder(fetcher.clone(), 1.0)
            .build(TaskKind::ImageSlideshow, &params, Path::new("s.mp4"))
            .await
            .unwrap();

        let downloaded = fetcher.dir.path().join("a.jpg");
        assert_eq!(built.scratch.files(), &[downloaded.clone()]);
        assert!(built.args.contains(&downloaded.to_string_lossy().to_string()));
        assert!(built.args.contains(&"local.jpg".to_string()));

        drop(built);
        assert!(!downloaded.exists());
    }

    #[tokio::test]
    async fn test_failed_fetch_removes_earlier_downloads() {
        let mut fetcher = FakeFetcher::new();
        fetcher.fail_on = Some("http://cdn/missing.jpg");
        let fetcher = Arc::new(fetcher);
        let params = TaskParams {
            image_paths: vec!["http://cdn/a.jpg".into(), "http://cdn/missing.jpg".into()],
            ..Default::default()
        };
        let result = builder(fetcher.clone(), 1.0)
            .build(TaskKind::ImageSlideshow, &params, Path::new("s.mp4"))
            .await;

        assert_matches!(result, Err(Error::Download { .. }));
        let fetched = fetcher.fetched.lock().clone();
        assert_eq!(fetched.len(), 1);
        assert!(!fetched[0].exists());
    }
}
