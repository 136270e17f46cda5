// src/validate.rs
//
// Admission checks run before the pipeline. Nothing here returns Err:
// every check yields a Verdict the caller branches on.

use crate::engine::{ConversionRequest, SourceAsset};
use crate::format::{is_allowed_token, ALLOWED_FORMAT_TOKENS};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024; // 50MB
pub const DEFAULT_MAX_DIMENSION: u32 = 20_000;
pub const DEFAULT_MAX_PIXELS: u64 = 50_000_000;

/// Longest name `sanitize_file_name` returns, in characters.
pub const MAX_FILE_NAME_CHARS: usize = 100;
/// Returned when nothing usable is left of a file name.
pub const PLACEHOLDER_FILE_NAME: &str = "image";

const DEFAULT_RATE_LIMIT: usize = 20;
const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);
const MAX_KEPT_EXTENSION_CHARS: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid { reason: Cow<'static, str> },
}

impl Verdict {
    pub fn invalid(reason: impl Into<Cow<'static, str>>) -> Self {
        Verdict::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Valid => None,
            Verdict::Invalid { reason } => Some(reason),
        }
    }

    /// Keep the first failure: `self` if invalid, otherwise run `next`.
    pub fn and_then(self, next: impl FnOnce() -> Verdict) -> Verdict {
        match self {
            Verdict::Valid => next(),
            invalid => invalid,
        }
    }
}

/// Size and dimension ceilings for admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_file_bytes: u64,
    pub max_dimension: u32,
    pub max_pixels: u64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_dimension: DEFAULT_MAX_DIMENSION,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl ValidationLimits {
    pub fn check_file(&self, mime: &str, len: u64) -> Verdict {
        if !mime.trim().to_ascii_lowercase().starts_with("image/") {
            return Verdict::invalid(format!("'{mime}' is not an image type"));
        }
        if len > self.max_file_bytes {
            return Verdict::invalid(format!(
                "file is {len} bytes, limit is {} bytes",
                self.max_file_bytes
            ));
        }
        Verdict::Valid
    }

    pub fn check_dimensions(&self, width: u32, height: u32) -> Verdict {
        if width == 0 || height == 0 {
            return Verdict::invalid(format!("image has zero dimensions ({width}x{height})"));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Verdict::invalid(format!(
                "{width}x{height} exceeds {}px per side",
                self.max_dimension
            ));
        }
        let pixels = width as u64 * height as u64;
        if pixels > self.max_pixels {
            return Verdict::invalid(format!(
                "{pixels} pixels exceeds the {} pixel limit",
                self.max_pixels
            ));
        }
        Verdict::Valid
    }
}

/// MIME prefix and size check against the default limits.
pub fn validate_file(asset: &SourceAsset) -> Verdict {
    ValidationLimits::default().check_file(asset.mime(), asset.len() as u64)
}

pub fn is_valid_image(asset: &SourceAsset) -> bool {
    validate_file(asset).is_valid()
}

pub fn validate_image_dimensions(width: u32, height: u32) -> Verdict {
    ValidationLimits::default().check_dimensions(width, height)
}

/// Check a format token, quality and optional compression level.
pub fn validate_conversion_params(
    format: &str,
    quality: i32,
    compression_level: Option<i32>,
) -> Verdict {
    if !is_allowed_token(format) {
        return Verdict::invalid(format!(
            "format '{format}' is not one of {}",
            ALLOWED_FORMAT_TOKENS.join(", ")
        ));
    }
    if !(1..=100).contains(&quality) {
        return Verdict::invalid(format!("quality {quality} is outside 1..=100"));
    }
    match compression_level {
        Some(level) if !(0..=100).contains(&level) => Verdict::invalid(format!(
            "compression level {level} is outside 0..=100"
        )),
        _ => Verdict::Valid,
    }
}

/// Make a user-supplied file name safe to hand back as a download name.
///
/// Separators and reserved characters are dropped, dot runs collapse to one
/// dot, leading dots and whitespace go, and the result is cut to
/// [`MAX_FILE_NAME_CHARS`] keeping a short extension. Applying it twice gives
/// the same result as applying it once.
pub fn sanitize_file_name(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '/' || c == '\\' || c.is_control() || "<>:\"|?*".contains(c) {
            continue;
        }
        if c == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(c);
    }

    let trimmed = cleaned
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();

    let result = if trimmed.chars().count() > MAX_FILE_NAME_CHARS {
        truncate_keeping_extension(trimmed)
    } else {
        trimmed.to_string()
    };

    if result.is_empty() {
        PLACEHOLDER_FILE_NAME.to_string()
    } else {
        result
    }
}

fn truncate_keeping_extension(name: &str) -> String {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| {
            let len = ext.chars().count();
            len > 0 && len <= MAX_KEPT_EXTENSION_CHARS && ext.chars().all(char::is_alphanumeric)
        });

    match extension {
        Some(ext) => {
            let budget = MAX_FILE_NAME_CHARS - ext.chars().count() - 1;
            let head: String = name.chars().take(budget).collect();
            let stem = head.trim_end_matches(|c: char| c == '.' || c.is_whitespace());
            let stem = if stem.is_empty() {
                PLACEHOLDER_FILE_NAME
            } else {
                stem
            };
            format!("{stem}.{ext}")
        }
        None => {
            let head: String = name.chars().take(MAX_FILE_NAME_CHARS).collect();
            head.trim_end().to_string()
        }
    }
}

/// Admission control for conversions per unit of time.
pub trait RateLimiter: Send + Sync {
    fn check(&self) -> Verdict;
}

/// Memory headroom check before a conversion allocates surfaces.
pub trait MemoryMonitor: Send + Sync {
    fn check(&self) -> Verdict;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn check(&self) -> Verdict {
        Verdict::Valid
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Unconstrained;

impl MemoryMonitor for Unconstrained {
    fn check(&self) -> Verdict {
        Verdict::Valid
    }
}

/// Allows at most `max_requests` passing checks within any `window`.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            admitted: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    fn check_at(&self, now: Instant) -> Verdict {
        let mut admitted = self.admitted.lock();
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
        if admitted.len() >= self.max_requests {
            return Verdict::invalid(format!(
                "rate limit reached: {} conversions per {}s",
                self.max_requests,
                self.window.as_secs()
            ));
        }
        admitted.push_back(now);
        Verdict::Valid
    }
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT, DEFAULT_RATE_WINDOW)
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check(&self) -> Verdict {
        self.check_at(Instant::now())
    }
}

/// All admission checks in order: file, parameters, rate, memory.
/// The first failing check decides the verdict.
pub fn preflight(
    asset: &SourceAsset,
    request: &ConversionRequest,
    limits: &ValidationLimits,
    rate_limiter: &dyn RateLimiter,
    memory: &dyn MemoryMonitor,
) -> Verdict {
    limits
        .check_file(asset.mime(), asset.len() as u64)
        .and_then(|| request.validate())
        .and_then(|| match (request.width(), request.height()) {
            (Some(w), Some(h)) => limits.check_dimensions(w, h),
            (Some(side), None) | (None, Some(side)) => limits.check_dimensions(side, 1),
            (None, None) => Verdict::Valid,
        })
        .and_then(|| rate_limiter.check())
        .and_then(|| memory.check())
}
