//! vadsrt - speech-aware subtitle generation
//!
//! Finds speech with voice activity detection, transcribes each speech chunk
//! with whisper.cpp, rebuilds a single monotonic timeline, translates the
//! result in concurrent batches over OpenAI-compatible endpoints, and writes
//! SRT files or muxes them into the video with ffmpeg.

pub mod cli;
pub mod config;
pub mod error;
pub mod language;
pub mod media;
pub mod segment;
pub mod subtitle;
pub mod timeline;
pub mod transcribe;
pub mod translate;
pub mod workflow;
