//! Command-line rendering and failure text extraction.

/// Human-readable command line: `"<binary> " + args joined by spaces`.
pub fn command_line(binary: &str, args: &[String]) -> String {
    format!("{} {}", binary, args.join(" "))
}

/// Value of the first `-filter_complex`, `-vf` or `-af` argument.
pub fn filter_graph(args: &[String]) -> String {
    args.windows(2)
        .find(|pair| matches!(pair[0].as_str(), "-filter_complex" | "-vf" | "-af"))
        .map(|pair| pair[1].clone())
        .unwrap_or_default()
}

/// Summarize why an encoder run failed.
///
/// Lines mentioning `error`, `invalid` or `failed` (any case) are returned
/// trimmed and joined with newlines. Without such lines the last five
/// non-empty lines of the log are returned instead.
pub fn extract_error(log: &str) -> String {
    let marked: Vec<&str> = log
        .lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("error") || lower.contains("invalid") || lower.contains("failed")
        })
        .map(str::trim)
        .collect();

    if !marked.is_empty() {
        return marked.join("\n");
    }

    let lines: Vec<&str> = log.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_line() {
        assert_eq!(
            command_line("/usr/bin/ffmpeg", &args(&["-i", "a.jpg", "-y", "o.mp4"])),
            "/usr/bin/ffmpeg -i a.jpg -y o.mp4"
        );
    }

    #[test]
    fn test_filter_graph_takes_first_filter_flag() {
        let a = args(&["-i", "x", "-vf", "scale=640:360", "-af", "volume=2"]);
        assert_eq!(filter_graph(&a), "scale=640:360");
        assert_eq!(filter_graph(&args(&["-i", "x", "-y", "o.mp4"])), "");
        // A trailing flag with no value has nothing to report
        assert_eq!(filter_graph(&args(&["-filter_complex"])), "");
    }

    #[test]
    fn test_extract_error_prefers_marked_lines() {
        let log = "ffmpeg version 6.0\n\
                   [image2 @ 0x1] Could not open file : nope.jpg\n\
                     Error opening input file nope.jpg.\n\
                   Invalid data found when processing input\n\
                   Conversion FAILED\n";
        assert_eq!(
            extract_error(log),
            "Error opening input file nope.jpg.\n\
             Invalid data found when processing input\n\
             Conversion FAILED"
        );
    }

    #[test]
    fn test_extract_error_falls_back_to_tail() {
        let log = "l1\nl2\nl3\nl4\nl5\nl6\nl7\n\n";
        assert_eq!(extract_error(log), "l3\nl4\nl5\nl6\nl7");
        assert_eq!(extract_error("only\n"), "only");
        assert_eq!(extract_error(""), "");
    }
}
