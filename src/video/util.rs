use std::path::Path;

use crate::{Error, Result};

fn av_time_base() -> f64 {
    f64::from(ffmpeg_next::ffi::AV_TIME_BASE)
}

// Converts a timestamp in time base units into seconds.
pub(crate) fn to_seconds(
    time_base: ffmpeg_next::util::rational::Rational,
    raw_timestamp: i64,
) -> f64 {
    raw_timestamp as f64 * f64::from(time_base)
}

// Seeks the input to the nearest keyframe at or before `seconds`. Under the hood, this uses
// the standard FFmpeg function, `avformat_seek_file`, with timestamps in `AV_TIME_BASE` units.
pub(crate) fn seek_to_seconds(
    ctx: &mut ffmpeg_next::format::context::Input,
    seconds: f64,
) -> Result<()> {
    let timestamp = (seconds.max(0.0) * av_time_base()) as i64;
    Ok(ctx.seek(timestamp, ..timestamp)?)
}

pub(crate) fn find_best_video_stream<'a>(
    input: &'a ffmpeg_next::format::context::Input,
    path: &Path,
) -> Result<ffmpeg_next::format::stream::Stream<'a>> {
    input
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| Error::NoVideoStream(path.to_owned()))
}

// Raw start timestamp of the stream. Frame timestamps are reported relative to this.
pub(crate) fn stream_origin(stream: &ffmpeg_next::format::stream::Stream) -> i64 {
    let start = stream.start_time();
    if start == ffmpeg_next::ffi::AV_NOPTS_VALUE {
        0
    } else {
        start
    }
}

// Average frame rate, falling back to the base rate and then to a fixed default.
pub(crate) fn stream_fps(stream: &ffmpeg_next::format::stream::Stream) -> f64 {
    [stream.avg_frame_rate(), stream.rate()]
        .into_iter()
        .filter(|r| r.numerator() > 0 && r.denominator() > 0)
        .map(f64::from)
        .next()
        .unwrap_or(super::FALLBACK_FPS)
}

// Stream duration in seconds.
//
// Try to get the duration from the stream info. If it is invalid, get it from the format
// context. As an example, Matroska does not store the duration in the stream; it only stores
// it in the format context.
pub(crate) fn stream_duration(
    ctx: &ffmpeg_next::format::context::Input,
    stream: &ffmpeg_next::format::stream::Stream,
) -> f64 {
    if stream.duration() > 0 {
        to_seconds(stream.time_base(), stream.duration())
    } else if ctx.duration() > 0 {
        ctx.duration() as f64 / av_time_base()
    } else {
        0.0
    }
}
