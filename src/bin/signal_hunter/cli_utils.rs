use anyhow::{bail, Result};
use signal_hunter::audio::{self, DeviceDirection, DeviceInfo};

pub(crate) fn list_devices() -> Result<()> {
    let devices = audio::list_devices().unwrap_or_else(|err| {
        eprintln!("Failed to list audio devices: {err}");
        Vec::new()
    });

    if devices.is_empty() {
        println!("No audio devices detected.");
        return Ok(());
    }
    println!("Available audio devices:");
    for device in &devices {
        println!("  - {}", describe_device(device));
    }
    Ok(())
}

pub(crate) fn describe_device(device: &DeviceInfo) -> String {
    let direction = match device.direction {
        DeviceDirection::Capture => "in ",
        DeviceDirection::Render => "out",
    };
    let index = device
        .index
        .map(|index| format!("#{index}"))
        .unwrap_or_else(|| "default".to_string());
    format!(
        "[{direction}] {index} {} ({} ch @ {} Hz)",
        device.name, device.channels, device.sample_rate
    )
}

/// Pick the endpoint called `wanted`, or the host default when unset.
pub(crate) fn resolve_device(
    devices: &[DeviceInfo],
    wanted: Option<&str>,
    direction: DeviceDirection,
) -> Result<DeviceInfo> {
    let Some(wanted) = wanted else {
        return Ok(DeviceInfo {
            name: "default".to_string(),
            index: None,
            channels: 0,
            sample_rate: 0,
            direction,
        });
    };
    let candidates = devices.iter().filter(|device| device.direction == direction);
    if let Some(found) = candidates
        .clone()
        .find(|device| device.name == wanted)
        .or_else(|| {
            candidates
                .clone()
                .find(|device| device.name.eq_ignore_ascii_case(wanted))
        })
    {
        return Ok(found.clone());
    }
    bail!("audio device '{wanted}' not found; run with --list-devices to see what is available");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(name: &str, index: usize, direction: DeviceDirection) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            index: Some(index),
            channels: 2,
            sample_rate: 48_000,
            direction,
        }
    }

    #[test]
    fn resolve_device_defaults_when_unset() {
        let resolved = resolve_device(&[], None, DeviceDirection::Render).expect("default");
        assert_eq!(resolved.index, None);
        assert_eq!(resolved.direction, DeviceDirection::Render);
    }

    #[test]
    fn resolve_device_matches_direction_and_case() {
        let devices = [
            device("USB Audio", 0, DeviceDirection::Render),
            device("USB Audio", 1, DeviceDirection::Capture),
        ];
        let found = resolve_device(&devices, Some("usb audio"), DeviceDirection::Capture)
            .expect("found");
        assert_eq!(found.index, Some(1));
        assert!(resolve_device(&devices, Some("Line In"), DeviceDirection::Capture).is_err());
    }

    #[test]
    fn describe_device_mentions_format() {
        let text = describe_device(&device("Mic", 3, DeviceDirection::Capture));
        assert_eq!(text, "[in ] #3 Mic (2 ch @ 48000 Hz)");
    }
}
