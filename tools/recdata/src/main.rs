use anyhow::{Context, Result};
use clap::Parser;
use reco_harness::audio::open_wave_file;
use reco_harness::recorded::{create_timestamp, RecordedHeader};
use reco_harness::{RecordedDataReader, RecordedDataWriter};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Print the header and buffer statistics of a recorded file
    Inspect(InspectArgs),
    /// Decode a recorded file to raw audio bytes
    Decode(DecodeArgs),
    /// Wrap raw audio (or the data of a .wav file) into a recorded file
    Encode(EncodeArgs),
    /// Check that recorded files decode and match their headers
    Validate(ValidateArgs),
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    file: PathBuf,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct DecodeArgs {
    file: PathBuf,

    #[arg(long, short = 'o')]
    output: PathBuf,
}

#[derive(clap::Args, Debug)]
struct EncodeArgs {
    input: PathBuf,

    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Bytes per base64 buffer line
    #[arg(long, default_value = "3200")]
    chunk_size: usize,

    #[arg(long, default_value = "audio")]
    frame_type: String,

    #[arg(long, default_value = "audio/pcm")]
    content_type: String,

    #[arg(long)]
    user_id: Option<String>,

    /// Header timestamp, defaults to now in 90 kHz ticks
    #[arg(long)]
    timestamp: Option<String>,
}

#[derive(clap::Args, Debug)]
struct ValidateArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Serialize, Debug)]
struct Inspection {
    path: PathBuf,
    header: RecordedHeader,
    decoded_bytes: u64,
    average_buffer_bytes: u64,
}

fn inspect(args: InspectArgs) -> Result<()> {
    let mut reader = RecordedDataReader::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let decoded = reader.read_all().context("decoding buffers")?;
    let header = reader.header().clone();
    let average_buffer_bytes = match header.num_of_buffers {
        0 => 0,
        n => decoded.len() as u64 / u64::from(n),
    };
    let inspection = Inspection {
        path: args.file,
        header,
        decoded_bytes: decoded.len() as u64,
        average_buffer_bytes,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    let h = &inspection.header;
    println!("file:          {}", inspection.path.display());
    println!("frame type:    {}", h.frame_type);
    println!("timestamp:     {}", h.timestamp);
    println!("content type:  {}", h.content_type);
    if let Some(user_id) = &h.user_id {
        println!("user id:       {user_id}");
    }
    println!("total bytes:   {}", h.total_bytes);
    println!("buffers:       {}", h.num_of_buffers);
    println!("avg buffer:    {} bytes", inspection.average_buffer_bytes);
    Ok(())
}

fn decode(args: DecodeArgs) -> Result<()> {
    let mut reader = RecordedDataReader::open(&args.file)
        .with_context(|| format!("opening {}", args.file.display()))?;
    let data = reader.read_all().context("decoding buffers")?;
    std::fs::write(&args.output, &data)
        .with_context(|| format!("writing {}", args.output.display()))?;
    info!(output = %args.output.display(), bytes = data.len(), "decoded");
    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    let is_wave = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    if !is_wave {
        return std::fs::read(path).with_context(|| format!("reading {}", path.display()));
    }
    let mut wave = open_wave_file(path)?;
    let mut data = Vec::new();
    wave.read_to_end(&mut data)
        .with_context(|| format!("reading wave data from {}", path.display()))?;
    Ok(data)
}

fn encode(args: EncodeArgs) -> Result<()> {
    if args.chunk_size == 0 {
        anyhow::bail!("--chunk-size must be positive");
    }
    let data = read_input(&args.input)?;
    if data.is_empty() {
        warn!(input = %args.input.display(), "input is empty, writing a header-only file");
    }

    let mut writer = RecordedDataWriter::new(args.content_type)
        .frame_type(args.frame_type)
        .timestamp(args.timestamp.unwrap_or_else(create_timestamp));
    if let Some(user_id) = args.user_id {
        writer = writer.user_id(user_id);
    }
    writer.push_chunked(&data, args.chunk_size);
    writer
        .write_file(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    let header = writer.header();
    info!(
        output = %args.output.display(),
        bytes = header.total_bytes,
        buffers = header.num_of_buffers,
        "encoded"
    );
    Ok(())
}

fn validate(args: ValidateArgs) -> Result<()> {
    let mut failures = 0usize;
    for file in &args.files {
        let outcome = RecordedDataReader::open(file).and_then(|mut r| r.read_all().map(|d| d.len()));
        match outcome {
            Ok(bytes) => println!("ok    {} ({bytes} bytes)", file.display()),
            Err(err) => {
                failures += 1;
                println!("FAIL  {}: {err}", file.display());
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} files failed validation", args.files.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match args.command {
        Command::Inspect(a) => inspect(a),
        Command::Decode(a) => decode(a),
        Command::Encode(a) => encode(a),
        Command::Validate(a) => validate(a),
    }
}
