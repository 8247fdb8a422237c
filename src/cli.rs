use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (defaults to ./vadsrt.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe an audio or video file to SRT
    Transcribe {
        /// Input audio or video file
        input: PathBuf,

        /// Source language hint (e.g. en, zh); auto-detected when omitted
        #[arg(short, long)]
        lang: Option<String>,

        /// Also translate the subtitles into this language
        #[arg(short, long)]
        to: Option<String>,

        /// Output SRT path, or the output video with --embed
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Isolate vocals before voice detection
        #[arg(long)]
        denoise: bool,

        /// Embed the resulting subtitles into the input video
        #[arg(long)]
        embed: bool,

        /// whisper.cpp model file, overrides transcriber.model_path
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Translate an existing SRT file
    Translate {
        /// Input SRT file
        input: PathBuf,

        /// Target language
        #[arg(short, long)]
        to: String,

        /// Output SRT path, or the output video with --video
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Embed the translation into this video
        #[arg(long)]
        video: Option<PathBuf>,
    },

    /// Embed an SRT file into a video as a soft subtitle track
    Embed {
        /// Input video file
        #[arg(long)]
        video: PathBuf,

        /// Subtitle file
        #[arg(short, long)]
        srt: PathBuf,

        /// Subtitle language; taken from the SRT file name when omitted
        #[arg(short, long)]
        lang: Option<String>,

        /// Output video file (defaults to <stem>_embed.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(default_value = "vadsrt.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
