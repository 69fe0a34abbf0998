use clap::{Parser, ValueEnum};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use unsplat_lib::{convert, convert_async, DecodeOptions, InputFormat};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    /// Directory or `.json` input is SOG, anything else compressed PLY.
    Auto,
    Ply,
    Sog,
}

#[derive(Parser, Debug)]
#[command(
    name = "Splat Decompressor",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Decompresses compressed PLY and SOG splat scenes into standard PLY files"
)]
struct Cli {
    #[arg(
        value_name = "INPUT",
        help = "Compressed PLY file, SOG meta.json or a directory containing it."
    )]
    input: PathBuf,

    #[arg(value_name = "OUTPUT", help = "Path to the output PLY file.")]
    output: PathBuf,

    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value_t = Format::Auto,
        help = "Input format."
    )]
    format: Format,

    #[arg(
        short = 't',
        long = "threads",
        value_name = "THREADS",
        default_value = "0",
        help = "Set the worker thread count for decoding (0 uses all cores)."
    )]
    threads: usize,

    #[arg(
        short = 's',
        long = "sequential",
        default_value = "false",
        help = "Decode on the calling thread only."
    )]
    sequential: bool,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Enable asynchronous file IO."
    )]
    async_mode: bool,
}

impl Cli {
    fn input_format(&self) -> InputFormat {
        match self.format {
            Format::Auto => InputFormat::detect(&self.input),
            Format::Ply => InputFormat::CompressedPly,
            Format::Sog => InputFormat::Sog,
        }
    }
}

fn run(cli: &Cli) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()?;
    }

    let format = cli.input_format();
    let options = DecodeOptions {
        parallel: !cli.sequential,
    };
    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };
    info!(
        "Mode: {} {:?} | Input: {} | Output: {}",
        mode,
        format,
        cli.input.display(),
        cli.output.display()
    );

    let count = if cli.async_mode {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        rt.block_on(convert_async(&cli.input, &cli.output, format, options))?
    } else {
        convert(&cli.input, &cli.output, format, options)?
    };
    Ok(count)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let start = Instant::now();
    match run(&cli) {
        Ok(count) => {
            info!("Decompression Time: {} ms", start.elapsed().as_millis());
            info!(
                "Successfully wrote {} splats to '{}'.",
                count,
                cli.output.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
