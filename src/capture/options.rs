//! Capture session options and CLI argument building.
//!
//! `CaptureOptions` is the caller-supplied, immutable configuration for one
//! capture session. `to_args` maps it to the capture binary's command line;
//! every option maps independently to zero or one flag, so absent optional
//! fields emit no tokens and the binary falls back to its own defaults.

/// Default target duration of one audio delivery, in milliseconds.
pub const DEFAULT_CHUNK_DURATION_MS: f64 = 200.0;

/// Upper bound on the configurable chunk duration, in milliseconds.
pub const MAX_CHUNK_DURATION_MS: f64 = 5000.0;

/// Error type for invalid or conflicting capture options.
///
/// Raised synchronously before any process is spawned.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Both include and exclude process filters were supplied.
    #[error("include and exclude process filters are mutually exclusive")]
    ConflictingProcessFilters,
    /// Chunk duration outside the supported range.
    #[error("chunk duration {0}ms outside supported range [0, {MAX_CHUNK_DURATION_MS}]ms")]
    InvalidChunkDuration(f64),
    /// Sample rate must be a positive integer.
    #[error("sample rate must be positive")]
    InvalidSampleRate,
}

/// Options for a capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    sample_rate: Option<u32>,
    chunk_duration_ms: f64,
    mute: bool,
    include_processes: Vec<u32>,
    exclude_processes: Vec<u32>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            sample_rate: None,
            chunk_duration_ms: DEFAULT_CHUNK_DURATION_MS,
            mute: false,
            include_processes: Vec::new(),
            exclude_processes: Vec::new(),
        }
    }
}

impl CaptureOptions {
    /// Create options with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a converted output sample rate in Hz.
    ///
    /// When unset the binary emits its unconverted native format.
    #[must_use]
    pub fn sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate = Some(hz);
        self
    }

    /// Set the target duration of one audio delivery, in milliseconds.
    ///
    /// The external process targets this duration; OS buffering can still
    /// split or coalesce deliveries.
    #[must_use]
    pub fn chunk_duration_ms(mut self, ms: f64) -> Self {
        self.chunk_duration_ms = ms;
        self
    }

    /// Mute the audio on the local output device while capturing.
    #[must_use]
    pub fn mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    /// Capture only audio from the given process IDs.
    #[must_use]
    pub fn include_processes(mut self, pids: &[u32]) -> Self {
        self.include_processes = pids.to_vec();
        self
    }

    /// Capture all audio except the given process IDs.
    #[must_use]
    pub fn exclude_processes(mut self, pids: &[u32]) -> Self {
        self.exclude_processes = pids.to_vec();
        self
    }

    /// Get the configured chunk duration in milliseconds.
    #[must_use]
    pub fn get_chunk_duration_ms(&self) -> f64 {
        self.chunk_duration_ms
    }

    /// Get the configured sample rate, if set.
    #[must_use]
    pub fn get_sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Validate the options without building arguments.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for conflicting process filters, an
    /// out-of-range chunk duration, or a zero sample rate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.include_processes.is_empty() && !self.exclude_processes.is_empty() {
            return Err(ConfigError::ConflictingProcessFilters);
        }
        if !self.chunk_duration_ms.is_finite()
            || self.chunk_duration_ms < 0.0
            || self.chunk_duration_ms > MAX_CHUNK_DURATION_MS
        {
            return Err(ConfigError::InvalidChunkDuration(self.chunk_duration_ms));
        }
        if self.sample_rate == Some(0) {
            return Err(ConfigError::InvalidSampleRate);
        }
        Ok(())
    }

    /// Build the capture binary's command-line arguments.
    ///
    /// The output is deterministic and order-stable. The chunk duration is
    /// converted from milliseconds to the seconds value the binary expects.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails; no tokens are produced.
    pub fn to_args(&self) -> Result<Vec<String>, ConfigError> {
        self.validate()?;

        let mut args = Vec::new();

        if let Some(rate) = self.sample_rate {
            args.push("--sample-rate".to_string());
            args.push(rate.to_string());
        }

        args.push("--chunk-duration".to_string());
        args.push(format_seconds(self.chunk_duration_ms));

        if self.mute {
            args.push("--mute".to_string());
        }

        if !self.include_processes.is_empty() {
            args.push("--include-processes".to_string());
            args.extend(self.include_processes.iter().map(ToString::to_string));
        }

        if !self.exclude_processes.is_empty() {
            args.push("--exclude-processes".to_string());
            args.extend(self.exclude_processes.iter().map(ToString::to_string));
        }

        Ok(args)
    }
}

/// Format a millisecond duration as the seconds token the binary expects.
fn format_seconds(ms: f64) -> String {
    format!("{}", ms / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_emit_only_chunk_duration() {
        let options = CaptureOptions::new();
        assert_eq!(options.get_chunk_duration_ms(), DEFAULT_CHUNK_DURATION_MS);
        assert_eq!(options.get_sample_rate(), None);

        let args = options.to_args().unwrap();
        assert_eq!(args, vec!["--chunk-duration", "0.2"]);
    }

    #[test]
    fn chunk_duration_converted_to_seconds() {
        let args = CaptureOptions::new()
            .chunk_duration_ms(100.0)
            .to_args()
            .unwrap();
        assert_eq!(args, vec!["--chunk-duration", "0.1"]);
    }

    #[test]
    fn conflicting_filters_rejected() {
        let result = CaptureOptions::new()
            .include_processes(&[100])
            .exclude_processes(&[200])
            .to_args();
        assert_eq!(result, Err(ConfigError::ConflictingProcessFilters));
    }

    #[test]
    fn chunk_duration_out_of_range_rejected() {
        let result = CaptureOptions::new().chunk_duration_ms(5000.1).validate();
        assert!(matches!(result, Err(ConfigError::InvalidChunkDuration(_))));

        let result = CaptureOptions::new().chunk_duration_ms(-1.0).validate();
        assert!(matches!(result, Err(ConfigError::InvalidChunkDuration(_))));
    }

    #[test]
    fn zero_sample_rate_rejected() {
        let result = CaptureOptions::new().sample_rate(0).validate();
        assert_eq!(result, Err(ConfigError::InvalidSampleRate));
    }
}
