//! CPAL audio output (requires `std`).
//!
//! The stream callback owns the [`Mixer`]; nothing else touches it once the
//! device is open.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error};

use crate::mixer::Mixer;
use crate::{Error, Result};

/// Wrapper to hold `cpal::Stream` in a `Send` context.
///
/// # Safety
/// `cpal::Stream` is `!Send` due to platform internals. The stream is only
/// started, paused and dropped through `&mut PlaybackDevice`, never shared.
struct StreamHandle(cpal::Stream);

unsafe impl Send for StreamHandle {}

/// An open output stream driven by a mixer.
pub struct PlaybackDevice {
    stream: StreamHandle,
    device_name: String,
    sample_rate: u32,
    channels: usize,
    is_playing: bool,
}

impl PlaybackDevice {
    /// Sample rate and channel count the device would open with. Build the
    /// mixer at this rate.
    pub fn default_config(device_index: Option<usize>) -> Result<(u32, usize)> {
        let config = get_device(device_index)?.default_output_config()?;
        Ok((config.sample_rate().0, config.channels() as usize))
    }

    /// Opens the device with `mixer` as the render callback. The stream is
    /// created paused; call [`play`](Self::play).
    pub fn open(mixer: Mixer, device_index: Option<usize>) -> Result<Self> {
        let device = get_device(device_index)?;
        let device_name = device.name()?;
        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        if (mixer.sample_rate() - sample_rate as f32).abs() > f32::EPSILON {
            return Err(Error::InvalidConfig(format!(
                "mixer runs at {} Hz but '{device_name}' runs at {sample_rate} Hz",
                mixer.sample_rate()
            )));
        }

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.into(), mixer)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.into(), mixer)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.into(), mixer)?,
            format => {
                return Err(Error::InvalidConfig(format!(
                    "Unsupported sample format: {format:?}"
                )));
            }
        };

        debug!(device = %device_name, sample_rate, channels, "Opened audio output");

        Ok(Self {
            stream: StreamHandle(stream),
            device_name,
            sample_rate,
            channels,
            is_playing: false,
        })
    }

    pub fn play(&mut self) -> Result<()> {
        if !self.is_playing {
            self.stream.0.play()?;
            self.is_playing = true;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.is_playing {
            self.stream.0.pause()?;
            self.is_playing = false;
        }
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn list_devices() -> Result<Vec<String>> {
        cpal::default_host()
            .output_devices()?
            .enumerate()
            .map(|(i, d)| -> Result<String> { Ok(format!("{i}: {}", d.name()?)) })
            .collect()
    }
}

impl std::fmt::Debug for PlaybackDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackDevice")
            .field("device_name", &self.device_name)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("is_playing", &self.is_playing)
            .finish()
    }
}

fn get_device(index: Option<usize>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    match index {
        Some(i) => {
            let devices: Vec<_> = host.output_devices()?.collect();
            let count = devices.len();
            devices.into_iter().nth(i).ok_or_else(|| {
                Error::InvalidDevice(format!("Device index {i} out of range ({count} available)"))
            })
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::InvalidDevice("No output device available".into())),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;

    // Grows on the first callback, then stable
    let mut stereo = Vec::<f32>::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let frames = data.len() / channels;
                if stereo.len() < frames * 2 {
                    stereo.resize(frames * 2, 0.0);
                }
                let produced = mixer.render(&mut stereo[..frames * 2], frames);
                write_output(data, channels, &stereo[..produced * 2]);
            }));

            if result.is_err() {
                output_silence(data);
            }
        },
        |err| error!(%err, "Audio stream error"),
        None,
    )?;

    Ok(stream)
}

/// Convert interleaved stereo f32 to the device format and channel count.
/// Mono devices get the average of both sides; channels past the second are
/// silent.
#[inline]
fn write_output<T: cpal::SizedSample + cpal::FromSample<f32>>(
    data: &mut [T],
    channels: usize,
    stereo: &[f32],
) {
    for (i, sample) in data.iter_mut().enumerate() {
        let frame = i / channels;
        let ch = i % channels;
        let value = match (stereo.get(frame * 2..frame * 2 + 2), channels, ch) {
            (Some(lr), 1, _) => (lr[0] + lr[1]) * 0.5,
            (Some(lr), _, 0 | 1) => lr[ch],
            _ => 0.0,
        };
        *sample = T::from_sample(value);
    }
}

/// Output silence (panic recovery).
#[inline]
fn output_silence<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_output_stereo_and_extra_channels() {
        let stereo = [0.5f32, -0.5, 0.25, -0.25];
        let mut data = [9.0f32; 8];
        write_output(&mut data, 4, &stereo);
        assert_eq!(data, [0.5, -0.5, 0.0, 0.0, 0.25, -0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_write_output_mono_downmix() {
        let stereo = [1.0f32, 0.0, 0.5, 0.5];
        let mut data = [0.0f32; 2];
        write_output(&mut data, 1, &stereo);
        assert_eq!(data, [0.5, 0.5]);
    }

    #[test]
    fn test_write_output_short_render_is_silent() {
        let mut data = [1i16; 4];
        write_output(&mut data, 2, &[]);
        assert_eq!(data, [0; 4]);
    }
}
