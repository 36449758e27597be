use std::path::Path;

use crate::config::ToolsConfig;

/// Abstract external tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
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

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add a path argument
    pub fn path<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").path(path)
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.path(path)
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Quiet, non-interactive ffmpeg preamble
    pub fn quiet(self) -> Self {
        self.args(["-hide_banner", "-nostdin", "-v", "warning"])
    }

    /// Select streams
    pub fn map<S: Into<String>>(self, selector: S) -> Self {
        self.arg("-map").arg(selector)
    }

    /// Copy every selected stream without re-encoding
    pub fn copy_streams(self) -> Self {
        self.arg("-c").arg("copy")
    }

    /// Move the index to the front of mp4-family outputs
    pub fn faststart(self) -> Self {
        self.arg("-movflags").arg("+faststart")
    }

    /// Add video filter
    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Render the command as a single shell line
    pub fn shell_line(&self) -> String {
        std::iter::once(&self.binary_path)
            .chain(self.args.iter())
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Which single stream a split writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
}

/// Builder for every tool invocation the pipeline makes
pub struct MediaCommandBuilder {
    tools: ToolsConfig,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    fn ffmpeg<S: Into<String>>(&self, description: S) -> MediaCommand {
        MediaCommand::new(&self.tools.ffmpeg, description).overwrite().quiet()
    }

    /// Stream-copy every stream into a new container
    pub fn remux<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
        exclude_attachments: bool,
    ) -> MediaCommand {
        let mut cmd = self.ffmpeg("Remux").input(input_path).map("0");
        if exclude_attachments {
            cmd = cmd.map("-0:t");
        }
        cmd.copy_streams().faststart().output(output_path)
    }

    /// Stream-copy the first video or audio stream into its own file
    pub fn split_stream<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
        kind: StreamKind,
    ) -> MediaCommand {
        let output_path = output_path.as_ref();
        let (description, selector) = match kind {
            StreamKind::Video => ("Split video stream", "0:V:0"),
            StreamKind::Audio => ("Split audio stream", "0:a:0"),
        };

        let mut cmd = self
            .ffmpeg(description)
            .input(input_path)
            .map(selector)
            .map("-0:t")
            .copy_streams();

        let ext = output_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if ext == "mp4" || ext == "m4a" {
            cmd = cmd.faststart();
        }
        cmd.output(output_path)
    }

    /// Copy the attached picture out of the container
    pub fn extract_thumbnail<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
    ) -> MediaCommand {
        self.ffmpeg("Thumbnail extraction")
            .input(input_path)
            .map("0:v")
            .map("-0:V")
            .copy_streams()
            .output(output_path)
    }

    /// Decode a single frame scaled into the bounding box
    pub fn generate_thumbnail<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: Q,
        width: u32,
        height: u32,
    ) -> MediaCommand {
        self.ffmpeg("Thumbnail generation")
            .input(input_path)
            .map("0:V")
            .video_filter(format!(
                "scale={}:{}:force_original_aspect_ratio=decrease,setsar=1:1",
                width, height
            ))
            .args(["-frames:v", "1", "-metadata:s:v:0", "rotate=0", "-q:v", "8"])
            .output(output_path)
    }

    /// Write one attachment stream to disk
    pub fn dump_attachment<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        stream_index: u32,
        output_path: Q,
    ) -> MediaCommand {
        self.ffmpeg("Attachment extraction")
            .arg(format!("-dump_attachment:{}", stream_index))
            .path(output_path)
            .input(input_path)
            .copy_streams()
            .args(["-t", "1", "-f", "null", "-"])
    }

    /// Describe streams and container as JSON
    pub fn probe_streams<P: AsRef<Path>>(&self, input_path: P) -> MediaCommand {
        MediaCommand::new(&self.tools.ffprobe, "Stream probe")
            .args(["-hide_banner", "-v", "warning"])
            .args(["-show_streams", "-show_format", "-of", "json"])
            .path(input_path)
    }

    /// Describe the container tracks as mediainfo JSON
    pub fn media_info<P: AsRef<Path>>(&self, input_path: P) -> MediaCommand {
        MediaCommand::new(&self.tools.mediainfo, "Container probe")
            .args(["--Output=JSON", "--"])
            .path(input_path)
    }

    /// Copy only the listed files from `source_dir` to `destination`
    pub fn sync<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        manifest: P,
        source_dir: Q,
        destination: &str,
    ) -> MediaCommand {
        MediaCommand::new(&self.tools.rclone, "Remote sync")
            .args(["copy", "--files-from"])
            .path(manifest)
            .path(source_dir)
            .arg(destination)
    }
}
