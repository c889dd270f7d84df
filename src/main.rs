use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{ArgAction, CommandFactory, ErrorKind, Parser, Subcommand};
use serde::Serialize;

use frameshift::video::{self, Analyzer, CompareType, OffsetFinder, OffsetResult};

#[derive(Debug, Subcommand)]
enum Commands {
    #[clap(after_help = "Displays info about frameshift and its dependencies.")]
    Info,

    #[clap(
        arg_required_else_help = true,
        after_help = "Find the temporal offset of a distorted video relative to a reference video. Both videos are fingerprinted at a low rate and cross-correlated, and the estimate is then refined at higher rates in narrower windows. The result is written to stdout as JSON."
    )]
    Find {
        #[clap(value_parser = clap::value_parser!(PathBuf), help = "Reference video.")]
        reference: PathBuf,

        #[clap(value_parser = clap::value_parser!(PathBuf), help = "Distorted video.")]
        distorted: PathBuf,

        #[clap(short = 't', long, value_enum, default_value_t = video::DEFAULT_COMPARE_TYPE, help = "Frame comparison algorithm. Hash algorithms compare bits and are robust to small changes in encoding. 'sad' compares downscaled grayscale pixels and is stricter.")]
        compare_type: CompareType,

        #[clap(
            long,
            default_value_t = video::DEFAULT_HASH_SIZE,
            value_parser = clap::value_parser!(u32),
            help = "Hash size. Hashes are hash_size x hash_size bits. Must be a power of two for 'whash'. Ignored by 'sad'."
        )]
        hash_size: u32,

        #[clap(
            long,
            default_value_t = video::DEFAULT_COARSE_FPS,
            value_parser = clap::value_parser!(f64),
            help = "Sampling rate of the coarse pass, in frames per second."
        )]
        coarse_fps: f64,

        #[clap(
            long,
            default_value_t = video::DEFAULT_FINE_FPS,
            value_parser = clap::value_parser!(f64),
            help = "Sampling rate of the fine pass, in frames per second. The fine pass is skipped if this is not higher than --coarse-fps."
        )]
        fine_fps: f64,

        #[clap(
            short = 'o',
            long,
            default_value_t = 0.0,
            value_parser = clap::value_parser!(f64),
            help = "Known minimum offset, in seconds. The reference video is only searched from this point on."
        )]
        start_offset: f64,

        #[clap(
            short = 's',
            long,
            value_parser = clap::value_parser!(f64),
            help = "Maximum offset to search for, in seconds, counted from --start-offset."
        )]
        max_search_offset: Option<f64>,

        #[clap(
            short = 'm',
            long,
            value_parser = clap::value_parser!(f64),
            help = "Maximum duration of the distorted video to analyze, in seconds."
        )]
        max_duration: Option<f64>,

        #[clap(
            long,
            default_value_t = video::DEFAULT_REFINE_WINDOW,
            value_parser = clap::value_parser!(f64),
            help = "Window around the coarse estimate searched by the fine pass, in seconds (on each side)."
        )]
        refine_window: f64,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Skip the final pass at the native frame rate."
        )]
        no_frame_accurate: bool,

        #[clap(
            long,
            default_value = "false",
            action(ArgAction::SetTrue),
            help = "Enable multi-threaded decoding in FFmpeg."
        )]
        threaded_decoding: bool,
    },
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "By default, video files are validated using FFmpeg, which is extremely accurate. Setting this flag will switch to just checking file headers."
    )]
    file_headers_only: bool,

    #[clap(
        short,
        long,
        global = true,
        default_value = "false",
        action(ArgAction::SetTrue),
        help = "Enable debug logging."
    )]
    verbose: bool,
}

impl Cli {
    fn validate(&self) {
        let mut cmd = Cli::command();
        match self.command {
            Commands::Info => (),
            Commands::Find {
                compare_type,
                hash_size,
                coarse_fps,
                fine_fps,
                start_offset,
                max_search_offset,
                max_duration,
                refine_window,
                ..
            } => {
                if !(coarse_fps > 0.0) || !(fine_fps > 0.0) {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "coarse_fps and fine_fps must be positive numbers",
                    )
                    .exit();
                }
                if !(refine_window > 0.0) {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "refine_window must be a positive number",
                    )
                    .exit();
                }
                if compare_type.is_hash() && hash_size < 2 {
                    cmd.error(ErrorKind::InvalidValue, "hash_size must be at least 2")
                        .exit();
                }
                if start_offset < 0.0 {
                    cmd.error(
                        ErrorKind::InvalidValue,
                        "start_offset cannot be negative",
                    )
                    .exit();
                }
                for (name, value) in [
                    ("max_search_offset", max_search_offset),
                    ("max_duration", max_duration),
                ] {
                    if matches!(value, Some(v) if !(v > 0.0)) {
                        cmd.error(
                            ErrorKind::InvalidValue,
                            format!("{} must be a positive number", name),
                        )
                        .exit();
                    }
                }
            }
        }
    }

    fn check_video_file(&self, path: &Path) {
        if !frameshift::util::is_valid_video_file(path, !self.file_headers_only) {
            let mut cmd = Cli::command();
            cmd.error(
                ErrorKind::InvalidValue,
                format!("{} is not a valid video file", path.display()),
            )
            .exit();
        }
    }
}

#[derive(Debug, Serialize)]
struct Settings {
    compare_type: CompareType,
    hash_size: u32,
    coarse_fps: f64,
    fine_fps: f64,
    start_offset: f64,
    max_search_offset: Option<f64>,
    max_duration: Option<f64>,
    refine_window: f64,
    frame_accurate: bool,
    compute_time: f64,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    date: String,
    reference: &'a Path,
    distorted: &'a Path,
    #[serde(flatten)]
    result: OffsetResult,
    settings: Settings,
}

fn main() -> frameshift::Result<()> {
    let args = Cli::parse();
    args.validate();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    ffmpeg_next::init()?;

    match args.command {
        Commands::Find {
            ref reference,
            ref distorted,
            compare_type,
            hash_size,
            coarse_fps,
            fine_fps,
            start_offset,
            max_search_offset,
            max_duration,
            refine_window,
            no_frame_accurate,
            threaded_decoding,
        } => {
            args.check_video_file(reference);
            args.check_video_file(distorted);

            let analyzer = Analyzer::default().with_threaded_decoding(threaded_decoding);
            let finder = OffsetFinder::new(analyzer)
                .with_compare_type(compare_type)
                .with_hash_size(hash_size)
                .with_coarse_fps(coarse_fps)
                .with_fine_fps(fine_fps)
                .with_start_offset(start_offset)
                .with_max_search_offset(max_search_offset)
                .with_max_duration(max_duration)
                .with_refine_window(refine_window)
                .with_frame_accurate(!no_frame_accurate);

            let started = Instant::now();
            let result = finder.find_offset(reference, distorted)?;
            let compute_time = started.elapsed().as_secs_f64();

            let report = Report {
                date: chrono::Local::now().to_rfc3339(),
                reference,
                distorted,
                result,
                settings: Settings {
                    compare_type,
                    hash_size,
                    coarse_fps,
                    fine_fps,
                    start_offset,
                    max_search_offset,
                    max_duration,
                    refine_window,
                    frame_accurate: !no_frame_accurate,
                    compute_time,
                },
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Info => {
            println!("FFmpeg version: {}", frameshift::util::ffmpeg_version_string());
        }
    }

    Ok(())
}
