use textplots::{Chart, Plot, Shape};

use crate::error::DaqError;
use crate::types::{ChannelBuffer, SampleBuffers};

/// Determine the best scale and unit prefix for a given maximum value
fn determine_scale(max_value: f64) -> (f64, &'static str) {
    if max_value >= 1.0 {
        (1.0, "")
    } else if max_value >= 1e-3 {
        (1e3, "m")
    } else {
        (1e6, "μ")
    }
}

/// Min, max and mean of one channel's readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl ChannelSummary {
    pub fn of(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let min = samples.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = samples.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self { min, max, mean })
    }
}

/// Plot one channel against time in the terminal
///
/// # Arguments
/// * `buffer` - Readings of the channel, in volts
/// * `rate` - Sample rate the buffer was captured at, used for the time axis
/// * `width` - Optional plot width (default: 140)
/// * `height` - Optional plot height (default: 40)
///
/// # Examples
/// ```
/// use daq_bridge::plotting::plot_channel;
/// use daq_bridge::{ChannelBuffer, ChannelId};
///
/// let buffer = ChannelBuffer {
///     channel: ChannelId::new(0),
///     samples: vec![0.0, 0.5, 1.0, 0.5, 0.0],
/// };
/// plot_channel(&buffer, 1000.0, None, None).unwrap();
/// ```
pub fn plot_channel(
    buffer: &ChannelBuffer,
    rate: f64,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), DaqError> {
    let summary = ChannelSummary::of(&buffer.samples).ok_or_else(|| {
        DaqError::InvalidParameter(format!("channel {} has no samples to plot", buffer.channel))
    })?;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(DaqError::InvalidParameter(format!(
            "cannot plot against a rate of {rate}"
        )));
    }

    let width = width.unwrap_or(140);
    let height = height.unwrap_or(40);

    let duration = (buffer.samples.len() - 1) as f64 / rate;
    let (time_scale, time_unit) = determine_scale(duration);
    let max_abs = summary.max.abs().max(summary.min.abs());
    let (value_scale, value_unit) = determine_scale(max_abs);

    let frame: Vec<(f32, f32)> = buffer
        .samples
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            (
                (i as f64 / rate * time_scale) as f32,
                (value * value_scale) as f32,
            )
        })
        .collect();

    println!("Channel {}", buffer.channel);
    println!(
        "{} samples at {} S/s | min {:.3} {}V, max {:.3} {}V, mean {:.3} {}V",
        buffer.samples.len(),
        rate,
        summary.min * value_scale,
        value_unit,
        summary.max * value_scale,
        value_unit,
        summary.mean * value_scale,
        value_unit
    );
    println!("{}", "─".repeat(width));

    // a single sample still needs a non-empty x range
    let x_max = ((duration * time_scale) as f32).max(f32::EPSILON);
    Chart::new(width as u32, height as u32, 0.0, x_max)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    println!("Time [{}s] →", time_unit);
    Ok(())
}

/// Plot every buffer of a response, one chart per channel in request order
pub fn plot_buffers(
    buffers: &SampleBuffers,
    rate: f64,
    width: Option<usize>,
    height: Option<usize>,
) -> Result<(), DaqError> {
    if buffers.is_empty() {
        return Err(DaqError::InvalidParameter("no buffers to plot".into()));
    }
    for buffer in buffers.iter() {
        plot_channel(buffer, rate, width, height)?;
        println!();
    }
    Ok(())
}
