use clap::Parser;
use env_logger::Env;
use log::{debug, LevelFilter};
use std::time::Duration;

use daq_bridge::plotting::plot_buffers;
use daq_bridge::protocol::Request;
use daq_bridge::{DaqClient, InputRange};

/// Poll a DAQ bridge server once and show the result
#[derive(Parser, Debug)]
#[command(name = "daq-poll")]
#[command(about = "Request samples from a daq-server and plot them", long_about = None)]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 65432)]
    port: u16,

    /// Channels to sample, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    channels: Vec<u16>,

    /// Samples per second per channel
    #[arg(short, long, default_value_t = 1000.0)]
    rate: f64,

    /// Samples per channel
    #[arg(short = 'n', long, default_value_t = 500)]
    count: usize,

    /// Input range for every channel (bip10_volts, bip5_volts, bip2_volts, bip1_volts)
    #[arg(long, value_name = "RANGE")]
    range: Option<String>,

    /// Seconds to wait for the response
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Print the raw JSON response instead of plotting
    #[arg(long)]
    json: bool,

    /// Show the device description instead of sampling
    #[arg(long)]
    describe: bool,

    /// Plot width in characters
    #[arg(long, default_value_t = 120)]
    width: usize,

    #[arg(long, default_value_t = 30)]
    height: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let level = args.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Warn);
    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();

    let mut client = DaqClient::builder()
        .address(&args.host)
        .port(args.port)
        .read_timeout(Duration::from_secs(args.timeout))
        .build()?;

    let request = if args.describe {
        Request::Describe
    } else {
        let request = Request::sample(&args.channels, args.rate, args.count);
        match &args.range {
            Some(name) => {
                let range: InputRange = serde_json::from_value(serde_json::Value::String(name.clone()))
                    .map_err(|_| format!("unknown input range '{name}'"))?;
                request.with_ranges(vec![range; args.channels.len()])
            }
            None => request,
        }
    };
    debug!("Sending {request:?}");

    let response = client.request(&request)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let response = response.into_result()?;
    if let Some(device) = &response.device {
        println!("{} (serial {})", device.name, device.serial);
        println!("  channels:    {}", device.channel_count);
        println!("  max rate:    {} S/s", device.max_rate);
        println!("  max samples: {}", device.max_samples);
        let ranges: Vec<String> = device.ranges.iter().map(|r| format!("±{} V", r.volts())).collect();
        println!("  ranges:      {}", ranges.join(", "));
    }
    if let Some(buffers) = &response.buffers {
        if let Some(at) = response.acquired_at {
            println!("Acquired at {}", at.to_rfc3339());
        }
        plot_buffers(
            buffers,
            response.rate.unwrap_or(args.rate),
            Some(args.width),
            Some(args.height),
        )?;
    }
    Ok(())
}
