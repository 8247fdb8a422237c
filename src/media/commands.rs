use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, VadsrtError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c").arg(codec)
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-acodec").arg(codec)
    }

    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    pub fn map<S: Into<String>>(self, selector: S) -> Self {
        self.arg("-map").arg(selector)
    }

    pub fn format<S: Into<String>>(self, format: S) -> Self {
        self.arg("-f").arg(format)
    }

    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Language metadata for the subtitle stream at `stream_index`
    pub fn subtitle_language(self, stream_index: usize, language_code: &str) -> Self {
        self.arg(format!("-metadata:s:s:{}", stream_index))
            .arg(format!("language={}", language_code))
    }

    /// Execute the command, discarding its output
    pub async fn execute(&self) -> Result<()> {
        self.execute_capture().await.map(|_| ())
    }

    /// Execute the command and return whatever it wrote to stdout
    pub async fn execute_capture(&self) -> Result<Vec<u8>> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VadsrtError::Media(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.trim().lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(VadsrtError::Media(format!(
                "{} failed: {}",
                self.description,
                tail.join("\n")
            )));
        }

        Ok(output.stdout)
    }
}

/// Builder for the ffmpeg and ffprobe invocations the pipeline needs
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    binary_path: String,
    probe_binary_path: String,
}

impl MediaCommandBuilder {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, probe_binary_path: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            probe_binary_path: probe_binary_path.into(),
        }
    }

    /// Decode any input to mono little-endian f32 PCM on stdout
    pub fn decode_audio<P: AsRef<Path>>(&self, input_path: P, sample_rate: u32) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Audio decoding")
            .args(["-nostdin", "-loglevel", "error"])
            .input(input_path)
            .format("f32le")
            .audio_codec("pcm_f32le")
            .audio_channels(1)
            .audio_sample_rate(sample_rate)
            .arg("-")
    }

    /// Mux `subtitle_path` as an extra soft subtitle stream, copying every existing stream
    pub fn embed_subtitles<P: AsRef<Path>>(
        &self,
        video_path: P,
        subtitle_path: P,
        output_path: P,
        subtitle_codec: &str,
        existing_subtitle_streams: usize,
        language_code: &str,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Subtitle embedding")
            .input(video_path)
            .input(subtitle_path)
            .codec("copy")
            .subtitle_codec(subtitle_codec)
            .map("0:v")
            .map("0:a?")
            .map("0:s?")
            .map("1")
            .subtitle_language(existing_subtitle_streams, language_code)
            .overwrite()
            .output(output_path)
    }

    /// List the subtitle streams of `video_path`, one index per line
    pub fn probe_subtitle_streams<P: AsRef<Path>>(&self, video_path: P) -> MediaCommand {
        MediaCommand::new(&self.probe_binary_path, "Subtitle stream probe")
            .args(["-v", "error", "-select_streams", "s", "-show_entries", "stream=index", "-of", "csv=p=0"])
            .output(video_path)
    }

    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

/// Reinterpret raw little-endian f32 bytes as samples; a trailing partial sample is ignored.
pub fn samples_from_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Soft-subtitle codec for a container, keyed by lower-case extension without the dot.
pub fn select_subtitle_codec(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mkv" => "srt",
        _ => "mov_text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_command_args() {
        let builder = MediaCommandBuilder::new("ffmpeg", "ffprobe");
        let cmd = builder.decode_audio("in put.mp4", 16_000);

        assert_eq!(cmd.binary_path, "ffmpeg");
        assert_eq!(
            cmd.args,
            vec![
                "-nostdin", "-loglevel", "error", "-i", "in put.mp4", "-f", "f32le", "-acodec",
                "pcm_f32le", "-ac", "1", "-ar", "16000", "-"
            ]
        );
    }

    #[test]
    fn test_embed_command_tags_new_stream() {
        let builder = MediaCommandBuilder::new("ffmpeg", "ffprobe");
        let cmd = builder.embed_subtitles("movie.mkv", "movie.zh.srt", "movie.tmp.mkv", "srt", 2, "chi");
        let joined = cmd.args.join(" ");

        assert!(joined.starts_with("-i movie.mkv -i movie.zh.srt -c copy -c:s srt"));
        assert!(joined.contains("-map 0:v -map 0:a? -map 0:s? -map 1"));
        assert!(joined.contains("-metadata:s:s:2 language=chi"));
        assert!(joined.ends_with("-y movie.tmp.mkv"));
    }

    #[test]
    fn test_probe_uses_probe_binary() {
        let builder = MediaCommandBuilder::new("ffmpeg", "/opt/ffprobe");
        let cmd = builder.probe_subtitle_streams("a.mp4");
        assert_eq!(cmd.binary_path, "/opt/ffprobe");
        assert_eq!(cmd.args.last().map(String::as_str), Some("a.mp4"));
    }

    #[test]
    fn test_samples_from_f32le() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-1.0f32).to_le_bytes());
        bytes.push(0xff);

        assert_eq!(samples_from_f32le(&bytes), vec![0.5, -1.0]);
    }

    #[test]
    fn test_subtitle_codec_selection() {
        assert_eq!(select_subtitle_codec("mkv"), "srt");
        assert_eq!(select_subtitle_codec("MKV"), "srt");
        assert_eq!(select_subtitle_codec("mp4"), "mov_text");
        assert_eq!(select_subtitle_codec("avi"), "mov_text");
    }

    #[tokio::test]
    async fn test_missing_binary_is_media_error() {
        let cmd = MediaCommand::new("/nonexistent/ffmpeg-binary", "Version check").arg("-version");
        assert!(matches!(cmd.execute().await, Err(VadsrtError::Media(_))));
    }
}
