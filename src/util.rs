use std::io::Read;
use std::path::Path;

/// Formats an offset given in seconds as "HH:MM:SS.mmm".
///
/// Negative offsets are rendered with a leading `-`.
pub fn format_timestamp(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total_millis = (seconds.abs() * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_seconds = total_millis / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;
    format!("{}{:02}:{:02}:{:02}.{:03}", sign, hours, minutes, secs, millis)
}

/// Checks if the given path points to a valid video file.
///
/// If `full` is set to **false**, only the file header will be checked. This is a very cheap
/// operation, but it does not guarantee validity. If set to **true**, FFmpeg will be used to
/// check that the file contains at least one video stream - this is more expensive, but much
/// more accurate.
pub fn is_valid_video_file(path: impl AsRef<Path>, full: bool) -> bool {
    if !full {
        let mut buf = [0u8; 8192];
        let n = match std::fs::File::open(path.as_ref()).and_then(|mut f| f.read(&mut buf)) {
            Ok(n) => n,
            Err(_) => return false,
        };
        return infer::is_video(&buf[..n]);
    }

    if let Ok(input) = ffmpeg_next::format::input(&path.as_ref()) {
        input
            .streams()
            .any(|s| s.parameters().medium() == ffmpeg_next::util::media::Type::Video)
    } else {
        false
    }
}

/// Returns the underlying FFmpeg version integer used by frameshift.
pub fn ffmpeg_version() -> u32 {
    ffmpeg_next::util::version()
}

/// Returns the underlying FFmpeg version string used by frameshift.
pub fn ffmpeg_version_string() -> String {
    let version_int = ffmpeg_version();

    // Reference: https://github.com/FFmpeg/FFmpeg/blob/130d19bf2044ac76372d1b97ab87ab283c8b37f8/libavutil/version.h#L64
    format!(
        "{}.{}.{}",
        version_int >> 16,             // MAJOR
        (version_int & 0x00FF00) >> 8, // MINOR
        version_int & 0xFF             // MICRO
    )
}
