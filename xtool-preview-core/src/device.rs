//! Device model database.
//!
//! Maps product identifiers (`iPhone15,2`) to display characteristics
//! used by the viewer page. The lookup is total: unknown identifiers
//! fall back to a sensible default frame.

use serde::Serialize;

// ── DisplayStyle ─────────────────────────────────────────────────

/// The physical frame style drawn around the preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayStyle {
    HomeButton,
    Notch,
    DynamicIsland,
}

impl DisplayStyle {
    /// CSS class name used by the viewer page.
    pub const fn css_class(self) -> &'static str {
        match self {
            DisplayStyle::HomeButton => "home-button",
            DisplayStyle::Notch => "notch",
            DisplayStyle::DynamicIsland => "dynamic-island",
        }
    }
}

// ── DeviceDisplayInfo ────────────────────────────────────────────

/// Display characteristics of one device model.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDisplayInfo {
    /// Marketing name.
    pub name: &'static str,
    /// Native screen width in pixels.
    pub screen_width: u32,
    /// Native screen height in pixels.
    pub screen_height: u32,
    pub display_style: DisplayStyle,
    /// Screen corner radius in pixels, for the CSS frame.
    pub corner_radius: u32,
}

const fn entry(
    name: &'static str,
    screen_width: u32,
    screen_height: u32,
    display_style: DisplayStyle,
    corner_radius: u32,
) -> DeviceDisplayInfo {
    DeviceDisplayInfo {
        name,
        screen_width,
        screen_height,
        display_style,
        corner_radius,
    }
}

/// Default frame for unknown iPhones (and anything else unrecognised).
const IPHONE_DEFAULT: DeviceDisplayInfo =
    entry("iPhone", 1179, 2556, DisplayStyle::DynamicIsland, 55);

/// Default frame for unknown iPads.
const IPAD_DEFAULT: DeviceDisplayInfo = entry("iPad", 1620, 2160, DisplayStyle::HomeButton, 18);

/// Look up display characteristics for a product identifier.
pub fn display_info(product_type: &str) -> DeviceDisplayInfo {
    use DisplayStyle::*;

    match product_type {
        "iPhone8,1" => entry("iPhone 6s", 750, 1334, HomeButton, 0),
        "iPhone8,2" => entry("iPhone 6s Plus", 1080, 1920, HomeButton, 0),
        "iPhone8,4" => entry("iPhone SE", 640, 1136, HomeButton, 0),
        "iPhone9,1" | "iPhone9,3" => entry("iPhone 7", 750, 1334, HomeButton, 0),
        "iPhone9,2" | "iPhone9,4" => entry("iPhone 7 Plus", 1080, 1920, HomeButton, 0),
        "iPhone10,1" | "iPhone10,4" => entry("iPhone 8", 750, 1334, HomeButton, 0),
        "iPhone10,2" | "iPhone10,5" => entry("iPhone 8 Plus", 1080, 1920, HomeButton, 0),
        "iPhone10,3" | "iPhone10,6" => entry("iPhone X", 1125, 2436, Notch, 40),
        "iPhone11,2" => entry("iPhone XS", 1125, 2436, Notch, 40),
        "iPhone11,4" | "iPhone11,6" => entry("iPhone XS Max", 1242, 2688, Notch, 40),
        "iPhone11,8" => entry("iPhone XR", 828, 1792, Notch, 42),
        "iPhone12,1" => entry("iPhone 11", 828, 1792, Notch, 42),
        "iPhone12,3" => entry("iPhone 11 Pro", 1125, 2436, Notch, 40),
        "iPhone12,5" => entry("iPhone 11 Pro Max", 1242, 2688, Notch, 40),
        "iPhone12,8" => entry("iPhone SE (2nd gen)", 750, 1334, HomeButton, 0),
        "iPhone13,1" => entry("iPhone 12 mini", 1080, 2340, Notch, 44),
        "iPhone13,2" => entry("iPhone 12", 1170, 2532, Notch, 47),
        "iPhone13,3" => entry("iPhone 12 Pro", 1170, 2532, Notch, 47),
        "iPhone13,4" => entry("iPhone 12 Pro Max", 1284, 2778, Notch, 53),
        "iPhone14,2" => entry("iPhone 13 Pro", 1170, 2532, Notch, 47),
        "iPhone14,3" => entry("iPhone 13 Pro Max", 1284, 2778, Notch, 53),
        "iPhone14,4" => entry("iPhone 13 mini", 1080, 2340, Notch, 44),
        "iPhone14,5" => entry("iPhone 13", 1170, 2532, Notch, 47),
        "iPhone14,6" => entry("iPhone SE (3rd gen)", 750, 1334, HomeButton, 0),
        "iPhone14,7" => entry("iPhone 14", 1170, 2532, Notch, 47),
        "iPhone14,8" => entry("iPhone 14 Plus", 1284, 2778, Notch, 53),
        "iPhone15,2" => entry("iPhone 14 Pro", 1179, 2556, DynamicIsland, 55),
        "iPhone15,3" => entry("iPhone 14 Pro Max", 1290, 2796, DynamicIsland, 55),
        "iPhone15,4" => entry("iPhone 15", 1179, 2556, DynamicIsland, 55),
        "iPhone15,5" => entry("iPhone 15 Plus", 1290, 2796, DynamicIsland, 55),
        "iPhone16,1" => entry("iPhone 15 Pro", 1179, 2556, DynamicIsland, 55),
        "iPhone16,2" => entry("iPhone 15 Pro Max", 1290, 2796, DynamicIsland, 55),
        other if other.starts_with("iPad") => IPAD_DEFAULT,
        _ => IPHONE_DEFAULT,
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_iphone() {
        let info = display_info("iPhone15,2");
        assert_eq!(info.name, "iPhone 14 Pro");
        assert_eq!(info.screen_width, 1179);
        assert_eq!(info.screen_height, 2556);
        assert_eq!(info.display_style, DisplayStyle::DynamicIsland);
        assert_eq!(info.corner_radius, 55);
    }

    #[test]
    fn unknown_iphone_defaults_to_dynamic_island() {
        let info = display_info("iPhone99,9");
        assert_eq!(info.name, "iPhone");
        assert_eq!(info.screen_width, 1179);
        assert_eq!(info.display_style, DisplayStyle::DynamicIsland);
    }

    #[test]
    fn ipad_prefix_defaults_to_home_button() {
        let info = display_info("iPad13,4");
        assert_eq!(info.name, "iPad");
        assert_eq!(info.screen_width, 1620);
        assert_eq!(info.screen_height, 2160);
        assert_eq!(info.display_style, DisplayStyle::HomeButton);
    }

    #[test]
    fn lookup_is_total() {
        let info = display_info("");
        assert_eq!(info.name, "iPhone");
        let info = display_info("AppleTV5,3");
        assert_eq!(info.name, "iPhone");
    }

    #[test]
    fn style_serializes_camel_case() {
        let json = serde_json::to_string(&DisplayStyle::DynamicIsland).unwrap();
        assert_eq!(json, "\"dynamicIsland\"");
        let json = serde_json::to_string(&DisplayStyle::HomeButton).unwrap();
        assert_eq!(json, "\"homeButton\"");
    }
}
