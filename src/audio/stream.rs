use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer, Split};

use super::engine::LooperEngine;
use crate::config::LooperConfig;

/// Largest block handed to the engine in one call. Longer device buffers are
/// processed in chunks.
pub const MAX_BLOCK: usize = 4096;

// Input blocks buffered between the two callbacks.
const INPUT_BLOCKS: usize = 4;

/// The default input and output devices, opened at the configured rate.
pub struct AudioStream {
    input_device: Device,
    output_device: Device,
    input_config: StreamConfig,
    output_config: StreamConfig,
    input_device_name: String,
    output_device_name: String,
}

impl AudioStream {
    pub fn new(config: &LooperConfig) -> Result<Self> {
        let host = cpal::default_host();

        let input_device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;
        let output_device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No output device available"))?;

        let input_default = input_device.default_input_config()?;
        let output_default = output_device.default_output_config()?;

        let input_device_name = input_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());
        let output_device_name = output_device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string());

        log::info!(
            "Input device: {} (default {}Hz, {}ch, {:?})",
            input_device_name,
            input_default.sample_rate().0,
            input_default.channels(),
            input_default.sample_format()
        );
        log::info!(
            "Output device: {} (default {}Hz, {}ch, {:?})",
            output_device_name,
            output_default.sample_rate().0,
            output_default.channels(),
            output_default.sample_format()
        );
        if input_default.sample_rate().0 != config.sample_rate
            || output_default.sample_rate().0 != config.sample_rate
        {
            log::warn!(
                "Device default rate differs from configured {}Hz; requesting {}Hz",
                config.sample_rate,
                config.sample_rate
            );
        }

        // Both sides run at the one configured rate.
        let input_config = StreamConfig {
            channels: input_default.channels(),
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let output_config = StreamConfig {
            channels: output_default.channels(),
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Ok(Self {
            input_device,
            output_device,
            input_config,
            output_config,
            input_device_name,
            output_device_name,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.output_config.sample_rate.0
    }

    pub fn input_device_name(&self) -> &str {
        &self.input_device_name
    }

    pub fn output_device_name(&self) -> &str {
        &self.output_device_name
    }

    /// Build and start both streams. The engine moves into the output
    /// callback, which becomes the audio thread.
    ///
    /// The returned streams must be kept alive for audio to keep running.
    pub fn start(&self, mut engine: LooperEngine) -> Result<(Stream, Stream)> {
        let input_channels = usize::from(self.input_config.channels.max(1));
        let output_channels = usize::from(self.output_config.channels.max(1));

        let ring = HeapRb::<f32>::new(MAX_BLOCK * input_channels * INPUT_BLOCKS);
        let (mut input_tx, mut input_rx) = ring.split();

        let input_stream = self.input_device.build_input_stream(
            &self.input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Whole frames only, so channels never slip.
                let room = input_tx.vacant_len().min(data.len());
                let samples = room - room % input_channels;
                input_tx.push_slice(&data[..samples]);
            },
            |err| log::error!("Input stream error: {}", err),
            None,
        )?;

        // Scratch for the output callback, sized once here.
        let mut interleaved = vec![0.0f32; MAX_BLOCK * input_channels];
        let mut in_left = vec![0.0f32; MAX_BLOCK];
        let mut in_right = vec![0.0f32; MAX_BLOCK];
        let mut out_left = vec![0.0f32; MAX_BLOCK];
        let mut out_right = vec![0.0f32; MAX_BLOCK];

        let output_stream = self.output_device.build_output_stream(
            &self.output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for chunk in data.chunks_mut(MAX_BLOCK * output_channels) {
                    let frames = chunk.len() / output_channels;
                    let wanted = frames * input_channels;
                    let read = input_rx.pop_slice(&mut interleaved[..wanted]);
                    // Underrun: the missing tail is silence.
                    interleaved[read..wanted].fill(0.0);

                    deinterleave(
                        &interleaved[..wanted],
                        input_channels,
                        &mut in_left[..frames],
                        &mut in_right[..frames],
                    );
                    engine.process(
                        &in_left[..frames],
                        &in_right[..frames],
                        &mut out_left[..frames],
                        &mut out_right[..frames],
                    );
                    interleave(
                        &out_left[..frames],
                        &out_right[..frames],
                        output_channels,
                        chunk,
                    );
                }
            },
            |err| log::error!("Output stream error: {}", err),
            None,
        )?;

        input_stream.play()?;
        output_stream.play()?;
        log::info!(
            "Audio streams started at {}Hz ({}ch in, {}ch out)",
            self.sample_rate(),
            input_channels,
            output_channels
        );

        Ok((input_stream, output_stream))
    }
}

/// Split interleaved input into left and right. Mono input feeds both sides;
/// channels past the second are ignored.
pub fn deinterleave(src: &[f32], channels: usize, left: &mut [f32], right: &mut [f32]) {
    let right_channel = if channels > 1 { 1 } else { 0 };
    for ((frame, l), r) in src
        .chunks_exact(channels)
        .zip(left.iter_mut())
        .zip(right.iter_mut())
    {
        *l = frame[0];
        *r = frame[right_channel];
    }
}

/// Write left and right into an interleaved device buffer. Mono output gets
/// the average; extra channels are silent.
pub fn interleave(left: &[f32], right: &[f32], channels: usize, dst: &mut [f32]) {
    for ((frame, &l), &r) in dst.chunks_exact_mut(channels).zip(left).zip(right) {
        match frame {
            [mono] => *mono = (l + r) * 0.5,
            [first, second, rest @ ..] => {
                *first = l;
                *second = r;
                rest.fill(0.0);
            }
            [] => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_stereo() {
        let src = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        let mut left = [0.0; 3];
        let mut right = [0.0; 3];
        deinterleave(&src, 2, &mut left, &mut right);
        assert_eq!(left, [1.0, 2.0, 3.0]);
        assert_eq!(right, [-1.0, -2.0, -3.0]);
    }

    #[test]
    fn test_deinterleave_mono_feeds_both_sides() {
        let mut left = [0.0; 2];
        let mut right = [0.0; 2];
        deinterleave(&[0.5, 0.25], 1, &mut left, &mut right);
        assert_eq!(left, [0.5, 0.25]);
        assert_eq!(right, [0.5, 0.25]);
    }

    #[test]
    fn test_deinterleave_ignores_extra_channels() {
        let mut left = [0.0; 1];
        let mut right = [0.0; 1];
        deinterleave(&[0.1, 0.2, 0.9, 0.9], 4, &mut left, &mut right);
        assert_eq!((left[0], right[0]), (0.1, 0.2));
    }

    #[test]
    fn test_interleave_layouts() {
        let mut stereo = [9.0; 4];
        interleave(&[1.0, 2.0], &[3.0, 4.0], 2, &mut stereo);
        assert_eq!(stereo, [1.0, 3.0, 2.0, 4.0]);

        let mut mono = [9.0; 2];
        interleave(&[1.0, 0.0], &[0.0, 0.5], 1, &mut mono);
        assert_eq!(mono, [0.5, 0.25]);

        let mut quad = [9.0; 4];
        interleave(&[1.0], &[2.0], 4, &mut quad);
        assert_eq!(quad, [1.0, 2.0, 0.0, 0.0]);
    }
}
