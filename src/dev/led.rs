//! Sysfs LED device handling.
//!
//! LEDs are discovered from the leds subsystem and classified through a probe
//! chain, most capable driver first. Periodic blinking uses the trigger
//! pattern interface (`Documentation/ABI/testing/sysfs-class-led-trigger-pattern`),
//! with a vendor path for QCOM LPG controllers that expose `hw_pattern`.

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Default sysfs directory of the leds subsystem.
pub const LED_SUBSYSTEM_ROOT: &str = "/sys/class/leds";

/// Opt-in marker attribute. Only devices carrying it (installed by the
/// packaged udev helper) are driven by the daemon.
const MARKER_ATTR: &str = "feedbackd";
const MARKER_VALUE: &str = "led";

const BRIGHTNESS_ATTR: &str = "brightness";
const MAX_BRIGHTNESS_ATTR: &str = "max_brightness";
const TRIGGER_ATTR: &str = "trigger";
const PATTERN_ATTR: &str = "pattern";
const PATTERN_TRIGGER: &str = "pattern";
const FLASH_BRIGHTNESS_ATTR: &str = "flash_brightness";
const MULTI_INDEX_ATTR: &str = "multi_index";
const MULTI_INTENSITY_ATTR: &str = "multi_intensity";
const HW_PATTERN_ATTR: &str = "hw_pattern";
const REPEAT_ATTR: &str = "repeat";
const REPEAT_INFINITE: &str = "-1";

const QCOM_LED_DRIVER: &str = "qcom-spmi-lpg";
/// QCOM LPG pattern engines cannot pause longer than this.
const QCOM_MAX_PAUSE_MS: u32 = 511;

/// Color classes a feedback can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColor {
    White,
    Red,
    Green,
    Blue,
    /// Free RGB value on a multicolor LED.
    Rgb,
    /// Camera flash LED; never used as a fallback target.
    Flash,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Parses a theme color string into a color class and RGB value.
pub fn parse_color(color: &str) -> Option<(LedColor, RgbColor)> {
    match color {
        "white" => Some((LedColor::White, RgbColor { r: 255, g: 255, b: 255 })),
        "red" => Some((LedColor::Red, RgbColor { r: 255, g: 0, b: 0 })),
        "green" => Some((LedColor::Green, RgbColor { r: 0, g: 255, b: 0 })),
        "blue" => Some((LedColor::Blue, RgbColor { r: 0, g: 0, b: 255 })),
        _ => parse_hex_color(color).map(|rgb| (LedColor::Rgb, rgb)),
    }
}

/// Like [`parse_color`] but falls back to white on unknown strings.
pub fn parse_color_lossy(color: &str) -> (LedColor, RgbColor) {
    parse_color(color).unwrap_or_else(|| {
        warn!("Can't parse color '{color}', using white");
        (LedColor::White, RgbColor { r: 255, g: 255, b: 255 })
    })
}

fn parse_hex_color(color: &str) -> Option<RgbColor> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(RgbColor {
        r: u8::from_str_radix(&hex[0..2], 16).ok()?,
        g: u8::from_str_radix(&hex[2..4], 16).ok()?,
        b: u8::from_str_radix(&hex[4..6], 16).ok()?,
    })
}

/// Driver classification established by the probe chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedVariant {
    /// QCOM LPG multicolor LED with hardware pattern support.
    QcomMulticolor { channels: [usize; 3] },
    /// QCOM LPG single color LED with hardware pattern support.
    Qcom,
    /// Generic multicolor LED with `multi_intensity`.
    Multicolor { channels: [usize; 3] },
    /// Camera flash LED.
    Flash,
    /// Plain single color LED.
    Plain,
}

impl LedVariant {
    fn default_priority(&self) -> i32 {
        match self {
            LedVariant::QcomMulticolor { .. } => 50,
            LedVariant::Qcom => 40,
            LedVariant::Multicolor { .. } => 30,
            LedVariant::Flash => 20,
            LedVariant::Plain => 10,
        }
    }
}

/// A single LED as seen in sysfs.
#[derive(Debug, Clone)]
pub struct LedDevice {
    path: PathBuf,
    name: String,
    max_brightness: u32,
    priority: i32,
    color: LedColor,
    variant: LedVariant,
}

impl LedDevice {
    /// Runs the probe chain on a sysfs LED directory. The first variant whose
    /// probe succeeds wins.
    pub fn probe(path: &Path) -> Option<LedDevice> {
        type Probe = fn(&Path) -> Result<LedDevice>;
        let chain: [(&str, Probe); 5] = [
            ("QCOM multicolor", Self::probe_qcom_multicolor),
            ("QCOM single color", Self::probe_qcom),
            ("multicolor", Self::probe_multicolor),
            ("flash", Self::probe_flash),
            ("single color", Self::probe_plain),
        ];

        for (label, probe) in chain {
            match probe(path) {
                Ok(led) => {
                    debug!("Discovered {} LED at {}", label, path.display());
                    return Some(led);
                }
                Err(err) => debug!("Not a {} LED: {}: {}", label, path.display(), err),
            }
        }
        debug!("Unable to determine LED driver for {}", path.display());
        None
    }

    fn base(path: &Path, color: LedColor, variant: LedVariant) -> Result<LedDevice> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let max_brightness = read_attr_u32(path, MAX_BRIGHTNESS_ATTR)?;
        if max_brightness == 0 {
            bail!("{name} has no max_brightness");
        }
        Ok(LedDevice {
            path: path.to_path_buf(),
            name,
            max_brightness,
            priority: variant.default_priority(),
            color,
            variant,
        })
    }

    fn probe_qcom_multicolor(path: &Path) -> Result<LedDevice> {
        check_qcom_driver(path)?;
        let channels = multicolor_channels(path)?;
        Self::base(path, LedColor::Rgb, LedVariant::QcomMulticolor { channels })
    }

    fn probe_qcom(path: &Path) -> Result<LedDevice> {
        check_qcom_driver(path)?;
        let color = color_from_name(path)?;
        Self::base(path, color, LedVariant::Qcom)
    }

    fn probe_multicolor(path: &Path) -> Result<LedDevice> {
        let channels = multicolor_channels(path)?;
        Self::base(path, LedColor::Rgb, LedVariant::Multicolor { channels })
    }

    fn probe_flash(path: &Path) -> Result<LedDevice> {
        if !path.join(FLASH_BRIGHTNESS_ATTR).exists() {
            bail!("no {FLASH_BRIGHTNESS_ATTR} attribute");
        }
        Self::base(path, LedColor::Flash, LedVariant::Flash)
    }

    fn probe_plain(path: &Path) -> Result<LedDevice> {
        let color = color_from_name(path)?;
        Self::base(path, color, LedVariant::Plain)
    }

    #[cfg(test)]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn max_brightness(&self) -> u32 {
        self.max_brightness
    }

    pub fn supports_color(&self, color: LedColor) -> bool {
        match self.variant {
            LedVariant::QcomMulticolor { .. } | LedVariant::Multicolor { .. } => !matches!(
                color,
                LedColor::Flash
            ),
            _ => self.color == color,
        }
    }

    /// Applies the color on multicolor LEDs; a no-op on single color ones.
    pub fn set_color(&self, color: LedColor, rgb: RgbColor) -> Result<()> {
        let channels = match &self.variant {
            LedVariant::QcomMulticolor { channels } | LedVariant::Multicolor { channels } => {
                *channels
            }
            _ => return Ok(()),
        };

        let max = self.max_brightness;
        let scale = |v: u8| (u32::from(v) * max) / 255;
        let (r, g, b) = match color {
            LedColor::White => (max, max, max),
            LedColor::Red => (max, 0, 0),
            LedColor::Green => (0, max, 0),
            LedColor::Blue => (0, 0, max),
            LedColor::Rgb => (scale(rgb.r), scale(rgb.g), scale(rgb.b)),
            LedColor::Flash => bail!("flash is not a multicolor target"),
        };

        let mut values = [0u32; 3];
        let [ri, gi, bi] = channels;
        values[ri] = r;
        values[gi] = g;
        values[bi] = b;

        self.set_brightness(max)?;
        let intensity = format!("{} {} {}\n", values[0], values[1], values[2]);
        debug!("Multicolor intensity for {}: {}", self.name, intensity.trim());
        write_attr(&self.path, MULTI_INTENSITY_ATTR, &intensity)
    }

    /// Starts a periodic blink pattern at `freq` mHz with the given maximum
    /// brightness percentage. `freq == 0` lights the LED constantly.
    pub fn start_periodic(&self, max_brightness_percentage: u32, freq: u32) -> Result<()> {
        if max_brightness_percentage > 100 {
            bail!("brightness percentage {max_brightness_percentage} out of range");
        }
        let max = self.max_brightness * max_brightness_percentage / 100;

        if freq == 0 {
            debug!("Constant light on {}, brightness {}%", self.name, max_brightness_percentage);
            return self.set_brightness(max);
        }

        /*  ms     mHz           T/2 */
        let t = 1000 * 1000 / freq / 2;
        match self.variant {
            LedVariant::Qcom | LedVariant::QcomMulticolor { .. } => {
                let t = t.min(QCOM_MAX_PAUSE_MS);
                let pattern = format!("0 {t} 0 0 {max} {t} {max} 0\n");
                write_attr(&self.path, REPEAT_ATTR, REPEAT_INFINITE)?;
                write_attr(&self.path, HW_PATTERN_ATTR, &pattern)
            }
            _ => {
                let pattern = format!("0 {t} {max} {t}\n");
                debug!(
                    "Freq {} mHz, brightness {}%, blink pattern: {}",
                    freq,
                    max_brightness_percentage,
                    pattern.trim()
                );
                write_attr(&self.path, TRIGGER_ATTR, PATTERN_TRIGGER)?;
                write_attr(&self.path, PATTERN_ATTR, &pattern)
            }
        }
    }

    /// Setting brightness to zero also disables a running pattern.
    pub fn set_brightness(&self, brightness: u32) -> Result<()> {
        write_attr(&self.path, BRIGHTNESS_ATTR, &brightness.to_string())
    }
}

fn color_from_name(path: &Path) -> Result<LedColor> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let known = [
        ("white", LedColor::White),
        ("red", LedColor::Red),
        ("green", LedColor::Green),
        ("blue", LedColor::Blue),
    ];
    for (tag, color) in known {
        if name.contains(tag) {
            return Ok(color);
        }
    }
    bail!("{name} names no usable color")
}

fn multicolor_channels(path: &Path) -> Result<[usize; 3]> {
    let index = read_attr(path, MULTI_INDEX_ATTR)?;
    let names: Vec<&str> = index.split_whitespace().collect();
    if names.len() != 3 {
        bail!("{MULTI_INDEX_ATTR} has {} entries instead of 3", names.len());
    }

    let mut channels = [usize::MAX; 3];
    for (pos, name) in names.iter().enumerate() {
        match *name {
            "red" => channels[0] = pos,
            "green" => channels[1] = pos,
            "blue" => channels[2] = pos,
            other => bail!("unsupported LED color index '{other}'"),
        }
    }
    Ok(channels)
}

fn check_qcom_driver(path: &Path) -> Result<()> {
    if !path.join(HW_PATTERN_ATTR).exists() {
        bail!("no {HW_PATTERN_ATTR} attribute");
    }
    let uevent = fs::read_to_string(path.join("device/uevent")).unwrap_or_default();
    let driver = uevent
        .lines()
        .find_map(|line| line.strip_prefix("DRIVER="))
        .unwrap_or_default();
    if driver != QCOM_LED_DRIVER {
        bail!("driver '{driver}' is not {QCOM_LED_DRIVER}");
    }
    Ok(())
}

fn read_attr(path: &Path, attr: &str) -> Result<String> {
    let file = path.join(attr);
    fs::read_to_string(&file)
        .map(|s| s.trim().to_string())
        .with_context(|| format!("Failed to read {}", file.display()))
}

fn read_attr_u32(path: &Path, attr: &str) -> Result<u32> {
    let value = read_attr(path, attr)?;
    value
        .parse()
        .with_context(|| format!("Attribute {attr} is not a number: '{value}'"))
}

fn write_attr(path: &Path, attr: &str, value: &str) -> Result<()> {
    let file = path.join(attr);
    fs::write(&file, value).with_context(|| format!("Failed to write {}", file.display()))
}

/// All usable LEDs, sorted by priority.
#[derive(Debug, Default)]
pub struct LedDevices {
    leds: Vec<LedDevice>,
}

impl LedDevices {
    /// Discovers LEDs from the default sysfs root.
    pub fn discover() -> Result<Self> {
        Self::discover_in(Path::new(LED_SUBSYSTEM_ROOT))
    }

    /// Discovers LEDs under `root`, keeping only devices that carry the
    /// opt-in marker and pass the probe chain.
    pub fn discover_in(root: &Path) -> Result<Self> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                bail!("No LED subsystem at {}", root.display())
            }
            Err(err) => return Err(err).context("Failed to enumerate LEDs"),
        };

        let mut leds = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let marked = read_attr(&path, MARKER_ATTR)
                .map(|v| v == MARKER_VALUE)
                .unwrap_or(false);
            if !marked {
                continue;
            }
            if let Some(led) = LedDevice::probe(&path) {
                leds.push(led);
            }
        }

        if leds.is_empty() {
            bail!("No usable LEDs found");
        }
        Ok(Self::from_leds(leds))
    }

    /// Builds the set from already probed devices, sorting by priority.
    pub fn from_leds(mut leds: Vec<LedDevice>) -> Self {
        leds.sort_by_key(|led| std::cmp::Reverse(led.priority()));
        Self { leds }
    }

    /// Picks the first LED supporting `color`, falling back to the first
    /// non-flash LED when no exact match exists.
    pub fn find_for_color(&self, color: LedColor) -> Option<&LedDevice> {
        self.leds
            .iter()
            .find(|led| led.supports_color(color))
            .or_else(|| {
                self.leds
                    .iter()
                    .find(|led| !led.supports_color(LedColor::Flash))
            })
    }

    pub fn has_led_for(&self, color: LedColor) -> bool {
        self.find_for_color(color).is_some()
    }

    pub fn start_periodic(
        &self,
        color: LedColor,
        rgb: RgbColor,
        max_brightness_percentage: u32,
        freq: u32,
    ) -> Result<()> {
        let led = self
            .find_for_color(color)
            .context("No usable LED found")?;
        led.set_color(color, rgb)?;
        led.start_periodic(max_brightness_percentage, freq)
    }

    pub fn stop(&self, color: LedColor) -> Result<()> {
        let led = self
            .find_for_color(color)
            .context("No usable LED found")?;
        led.set_brightness(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fake_led(root: &TempDir, name: &str, attrs: &[(&str, &str)]) -> PathBuf {
        let dir = root.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MARKER_ATTR), MARKER_VALUE).unwrap();
        fs::write(dir.join(BRIGHTNESS_ATTR), "0").unwrap();
        for (attr, value) in attrs {
            let file = dir.join(attr);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(file, value).unwrap();
        }
        dir
    }

    #[test]
    fn parses_colors() {
        assert_eq!(
            parse_color("red"),
            Some((LedColor::Red, RgbColor { r: 255, g: 0, b: 0 }))
        );
        assert_eq!(
            parse_color("#10a0FF"),
            Some((LedColor::Rgb, RgbColor { r: 0x10, g: 0xa0, b: 0xff }))
        );
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("magenta"), None);
        assert_eq!(parse_color_lossy("magenta").0, LedColor::White);
    }

    #[test]
    fn probes_plain_led() {
        let root = TempDir::new().unwrap();
        let dir = fake_led(&root, "white:indicator", &[(MAX_BRIGHTNESS_ATTR, "255")]);

        let led = LedDevice::probe(&dir).unwrap();
        assert_eq!(led.variant, LedVariant::Plain);
        assert!(led.supports_color(LedColor::White));
        assert!(!led.supports_color(LedColor::Red));
        assert_eq!(led.max_brightness(), 255);
    }

    #[test]
    fn probes_multicolor_led() {
        let root = TempDir::new().unwrap();
        let dir = fake_led(
            &root,
            "rgb:status",
            &[
                (MAX_BRIGHTNESS_ATTR, "128"),
                (MULTI_INDEX_ATTR, "green blue red"),
                (MULTI_INTENSITY_ATTR, "0 0 0"),
            ],
        );

        let led = LedDevice::probe(&dir).unwrap();
        assert_eq!(
            led.variant,
            LedVariant::Multicolor { channels: [2, 0, 1] }
        );
        assert!(led.supports_color(LedColor::Red));
        assert!(led.supports_color(LedColor::Rgb));
        assert!(!led.supports_color(LedColor::Flash));

        led.set_color(LedColor::Red, RgbColor::default()).unwrap();
        // red sits in channel 2 per multi_index
        assert_eq!(
            fs::read_to_string(dir.join(MULTI_INTENSITY_ATTR)).unwrap(),
            "0 0 128\n"
        );
        assert_eq!(fs::read_to_string(dir.join(BRIGHTNESS_ATTR)).unwrap(), "128");
    }

    #[test]
    fn ignores_unmarked_devices() {
        let root = TempDir::new().unwrap();
        fake_led(&root, "red:status", &[(MAX_BRIGHTNESS_ATTR, "255")]);
        let unmarked = root.path().join("blue:status");
        fs::create_dir_all(&unmarked).unwrap();
        fs::write(unmarked.join(MAX_BRIGHTNESS_ATTR), "255").unwrap();

        let leds = LedDevices::discover_in(root.path()).unwrap();
        assert_eq!(leds.leds.len(), 1);
        assert_eq!(leds.leds[0].name(), "red:status");
    }

    #[test]
    fn discovery_without_leds_fails() {
        let root = TempDir::new().unwrap();
        assert!(LedDevices::discover_in(root.path()).is_err());
    }

    #[test]
    fn selection_prefers_priority_and_capability() {
        let root = TempDir::new().unwrap();
        let plain = fake_led(&root, "white:indicator", &[(MAX_BRIGHTNESS_ATTR, "255")]);
        let multi = fake_led(
            &root,
            "rgb:status",
            &[
                (MAX_BRIGHTNESS_ATTR, "255"),
                (MULTI_INDEX_ATTR, "red green blue"),
                (MULTI_INTENSITY_ATTR, "0 0 0"),
            ],
        );

        let leds = LedDevices::from_leds(vec![
            LedDevice::probe(&plain).unwrap().with_priority(10),
            LedDevice::probe(&multi).unwrap().with_priority(5),
        ]);

        // Only the multicolor LED can do red.
        assert_eq!(
            leds.find_for_color(LedColor::Red).unwrap().name(),
            "rgb:status"
        );
        // Both can do white, the higher priority device wins.
        assert_eq!(
            leds.find_for_color(LedColor::White).unwrap().name(),
            "white:indicator"
        );
    }

    #[test]
    fn falls_back_to_non_flash_led() {
        let root = TempDir::new().unwrap();
        let blue = fake_led(&root, "blue:indicator", &[(MAX_BRIGHTNESS_ATTR, "255")]);
        let led = LedDevice::probe(&blue).unwrap();
        let leds = LedDevices::from_leds(vec![led]);

        // No red LED exists; the non-flash blue LED is used instead.
        assert_eq!(
            leds.find_for_color(LedColor::Red).unwrap().name(),
            "blue:indicator"
        );
    }

    #[test]
    fn periodic_pattern_contents() {
        let root = TempDir::new().unwrap();
        let dir = fake_led(
            &root,
            "white:indicator",
            &[(MAX_BRIGHTNESS_ATTR, "200"), (TRIGGER_ATTR, "none"), (PATTERN_ATTR, "")],
        );
        let led = LedDevice::probe(&dir).unwrap();

        // 2000 mHz -> half period of 250 ms, 50% of 200 -> 100.
        led.start_periodic(50, 2000).unwrap();
        assert_eq!(fs::read_to_string(dir.join(TRIGGER_ATTR)).unwrap(), "pattern");
        assert_eq!(
            fs::read_to_string(dir.join(PATTERN_ATTR)).unwrap(),
            "0 250 100 250\n"
        );

        led.set_brightness(0).unwrap();
        assert_eq!(fs::read_to_string(dir.join(BRIGHTNESS_ATTR)).unwrap(), "0");
    }

    #[test]
    fn qcom_pattern_uses_hw_interface() {
        let root = TempDir::new().unwrap();
        let dir = fake_led(
            &root,
            "red:status",
            &[
                (MAX_BRIGHTNESS_ATTR, "255"),
                (HW_PATTERN_ATTR, ""),
                (REPEAT_ATTR, ""),
                ("device/uevent", "DRIVER=qcom-spmi-lpg\n"),
            ],
        );
        let led = LedDevice::probe(&dir).unwrap();
        assert_eq!(led.variant, LedVariant::Qcom);

        // 500 mHz -> half period of 1000 ms, capped at 511 for the LPG engine.
        led.start_periodic(100, 500).unwrap();
        assert_eq!(fs::read_to_string(dir.join(REPEAT_ATTR)).unwrap(), "-1");
        assert_eq!(
            fs::read_to_string(dir.join(HW_PATTERN_ATTR)).unwrap(),
            "0 511 0 0 255 511 255 0\n"
        );
    }

    #[test]
    fn constant_light_sets_brightness() {
        let root = TempDir::new().unwrap();
        let dir = fake_led(&root, "green:status", &[(MAX_BRIGHTNESS_ATTR, "100")]);
        let led = LedDevice::probe(&dir).unwrap();

        led.start_periodic(80, 0).unwrap();
        assert_eq!(fs::read_to_string(dir.join(BRIGHTNESS_ATTR)).unwrap(), "80");
    }
}
