//! Audio device enumeration and stream configuration

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{AudioError, AudioResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Which side of the duplex stream a device serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

/// Get list of available devices for one direction
pub fn list_devices(direction: Direction) -> AudioResult<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = default_device(&host, direction).and_then(|d| d.name().ok());

    let names = devices(&host, direction)?
        .into_iter()
        .filter_map(|device| device.name().ok());
    Ok(mark_default(names, default_name.as_deref()))
}

fn mark_default(names: impl IntoIterator<Item = String>, default_name: Option<&str>) -> Vec<AudioDeviceInfo> {
    names
        .into_iter()
        .map(|name| AudioDeviceInfo {
            is_default: Some(name.as_str()) == default_name,
            name,
        })
        .collect()
}

/// One line of the device listing: `*` marks the device that will be opened
fn device_label(info: &AudioDeviceInfo, selected: Option<&str>) -> String {
    let chosen = match selected {
        Some(name) => info.name == name,
        None => info.is_default,
    };
    format!(
        "{} {}{}",
        if chosen { "*" } else { " " },
        info.name,
        if info.is_default { " (default)" } else { "" }
    )
}

/// Log the devices of one direction, marking the default and the one
/// `selected` by the config (the default when `None`)
pub fn log_devices(direction: Direction, selected: Option<&str>) {
    match list_devices(direction) {
        Ok(devices) => {
            log::info!("{} devices:", direction.as_str());
            for info in &devices {
                log::info!("  {}", device_label(info, selected));
            }
            if let Some(name) = selected {
                if !devices.iter().any(|d| d.name == name) {
                    log::warn!("Configured {} device '{}' is not present", direction.as_str(), name);
                }
            }
        }
        Err(e) => log::warn!("{}", e),
    }
}

fn devices(host: &cpal::Host, direction: Direction) -> AudioResult<Vec<cpal::Device>> {
    let enumeration_err = |e: cpal::DevicesError| AudioError::Enumeration(e.to_string());
    Ok(match direction {
        Direction::Input => host.input_devices().map_err(enumeration_err)?.collect(),
        Direction::Output => host.output_devices().map_err(enumeration_err)?.collect(),
    })
}

fn default_device(host: &cpal::Host, direction: Direction) -> Option<cpal::Device> {
    match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
}

/// Get device by name, or the system default if name is None
pub fn get_device(direction: Direction, name: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();

    match name {
        Some(device_name) => {
            for device in devices(&host, direction)? {
                if let Ok(n) = device.name() {
                    if n == device_name {
                        return Ok(device);
                    }
                }
            }
            Err(AudioError::DeviceNotFound(device_name.to_string()))
        }
        None => default_device(&host, direction)
            .ok_or(AudioError::NoDefaultDevice(direction.as_str())),
    }
}

/// Stream config for a device at the requested sample rate and block size
///
/// Falls back to the device's default rate with a driver-chosen block size
/// when the requested rate is not supported. Channels are capped at 2.
pub fn stream_config(
    device: &cpal::Device,
    direction: Direction,
    sample_rate: u32,
    block_size: usize,
) -> AudioResult<cpal::StreamConfig> {
    let supported: Vec<cpal::SupportedStreamConfigRange> = match direction {
        Direction::Input => device.supported_input_configs().map(|c| c.collect::<Vec<_>>()),
        Direction::Output => device.supported_output_configs().map(|c| c.collect::<Vec<_>>()),
    }
    .map_err(|e| AudioError::Config(e.to_string()))?;

    let min_channels = match direction {
        Direction::Input => 1,
        Direction::Output => 2,
    };

    for config in &supported {
        if sample_rate >= config.min_sample_rate().0
            && sample_rate <= config.max_sample_rate().0
            && config.channels() >= min_channels
        {
            return Ok(cpal::StreamConfig {
                channels: config.channels().min(2),
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: fixed_buffer_size(config.buffer_size(), block_size),
            });
        }
    }

    let default_config = match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    }
    .map_err(|e| AudioError::Config(e.to_string()))?;

    log::warn!(
        "{} device does not support {} Hz, using {} Hz",
        direction.as_str(),
        sample_rate,
        default_config.sample_rate().0
    );

    Ok(cpal::StreamConfig {
        channels: default_config.channels().min(2),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    })
}

fn fixed_buffer_size(range: &cpal::SupportedBufferSize, block_size: usize) -> cpal::BufferSize {
    let frames = block_size as u32;
    match range {
        cpal::SupportedBufferSize::Range { min, max } if frames >= *min && frames <= *max => {
            cpal::BufferSize::Fixed(frames)
        }
        _ => cpal::BufferSize::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_buffer_size() {
        let range = cpal::SupportedBufferSize::Range { min: 64, max: 4096 };
        assert_eq!(fixed_buffer_size(&range, 256), cpal::BufferSize::Fixed(256));
        assert_eq!(fixed_buffer_size(&range, 8192), cpal::BufferSize::Default);
        assert_eq!(
            fixed_buffer_size(&cpal::SupportedBufferSize::Unknown, 256),
            cpal::BufferSize::Default
        );
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_mark_default() {
        let devices = mark_default(names(&["Built-in", "Interface", "HDMI"]), Some("Interface"));
        let flags: Vec<bool> = devices.iter().map(|d| d.is_default).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert_eq!(devices[1].name, "Interface");

        let devices = mark_default(names(&["Built-in"]), None);
        assert!(!devices[0].is_default);
    }

    #[test]
    fn test_device_label() {
        let devices = mark_default(names(&["Built-in", "Interface"]), Some("Built-in"));

        // Nothing configured: the default is the one opened
        assert_eq!(device_label(&devices[0], None), "* Built-in (default)");
        assert_eq!(device_label(&devices[1], None), "  Interface");

        assert_eq!(device_label(&devices[0], Some("Interface")), "  Built-in (default)");
        assert_eq!(device_label(&devices[1], Some("Interface")), "* Interface");
    }

    #[test]
    fn test_direction_names() {
        assert_eq!(Direction::Input.as_str(), "input");
        assert_eq!(Direction::Output.as_str(), "output");
    }
}
