//! crates/location_tracking_core/src/fingerprint.rs
//!
//! Derives a `DeviceFingerprint` from the ambient environment. Pure and
//! infallible: anything that cannot be recognised becomes `"Unknown"`.

use crate::domain::{AmbientEnvironment, DeviceFingerprint, DeviceType, UNKNOWN};
use regex::Regex;
use std::sync::OnceLock;

/// Browser families in match order. Edge and Opera also advertise `Chrome/`,
/// and Chrome advertises `Safari/`, so the more specific tokens come first.
const BROWSERS: &[(&str, &str)] = &[
    ("Edge", r"Edg(?:e|A|iOS)?/([\d.]+)"),
    ("Opera", r"(?:OPR|Opera)/([\d.]+)"),
    ("Firefox", r"(?:Firefox|FxiOS)/([\d.]+)"),
    ("Chrome", r"(?:Chrome|CriOS)/([\d.]+)"),
    ("Safari", r"Version/([\d.]+).*Safari/"),
    ("Internet Explorer", r"(?:MSIE |Trident/.*rv:)([\d.]+)"),
];

fn browser_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BROWSERS
            .iter()
            .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
            .collect()
    })
}

fn os_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("Windows", r"Windows NT ([\d.]+)"),
            ("iOS", r"(?:iPhone|CPU) OS ([\d_]+)"),
            ("macOS", r"Mac OS X ([\d_.]+)"),
            ("Android", r"Android ([\d.]+)"),
            ("Chrome OS", r"CrOS \S+ ([\d.]+)"),
            ("Linux", r"(Linux)"),
        ]
        .iter()
        .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (*name, re)))
        .collect()
    })
}

/// Collects a fingerprint for the given environment.
pub fn collect(env: &AmbientEnvironment) -> DeviceFingerprint {
    let user_agent = env
        .user_agent
        .as_deref()
        .map(str::trim)
        .filter(|ua| !ua.is_empty());

    let (browser, browser_version) = user_agent
        .and_then(detect_browser)
        .unwrap_or_else(|| (UNKNOWN.to_string(), UNKNOWN.to_string()));
    let (os, os_version) = user_agent
        .and_then(detect_os)
        .unwrap_or_else(|| (UNKNOWN.to_string(), UNKNOWN.to_string()));

    DeviceFingerprint {
        user_agent: user_agent.unwrap_or(UNKNOWN).to_string(),
        browser,
        browser_version,
        os,
        os_version,
        device_type: user_agent.map(detect_device_type).unwrap_or(DeviceType::Desktop),
        screen_resolution: match env.screen {
            Some((w, h)) if w > 0 && h > 0 => format!("{}x{}", w, h),
            _ => UNKNOWN.to_string(),
        },
        timezone: non_empty_or_unknown(env.timezone.as_deref()),
        language: non_empty_or_unknown(env.language.as_deref()),
    }
}

fn non_empty_or_unknown(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn detect_browser(ua: &str) -> Option<(String, String)> {
    browser_patterns().iter().find_map(|(name, re)| {
        re.captures(ua).map(|caps| {
            let version = caps
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| UNKNOWN.to_string());
            (name.to_string(), version)
        })
    })
}

fn detect_os(ua: &str) -> Option<(String, String)> {
    os_patterns().iter().find_map(|(name, re)| {
        re.captures(ua).map(|caps| {
            let raw = caps.get(1).map(|m| m.as_str()).unwrap_or(UNKNOWN);
            let version = match *name {
                "Windows" => windows_release(raw).to_string(),
                "Linux" => UNKNOWN.to_string(),
                _ => raw.replace('_', "."),
            };
            (name.to_string(), version)
        })
    })
}

/// NT kernel versions as marketed. 10.0 covers both 10 and 11.
fn windows_release(nt: &str) -> &str {
    match nt {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "Vista",
        "5.1" | "5.2" => "XP",
        other => other,
    }
}

fn detect_device_type(ua: &str) -> DeviceType {
    let lower = ua.to_ascii_lowercase();
    if lower.contains("ipad")
        || lower.contains("tablet")
        || (lower.contains("android") && !lower.contains("mobile"))
    {
        DeviceType::Tablet
    } else if lower.contains("mobi") || lower.contains("iphone") || lower.contains("ipod") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}
