use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use miette::Result;
use picflash::{
    cli::{
        self, BlankRegion, ChipArgs, ChipId, CliProgress, ConnectArgs, ConvertMode, DumpRegion,
        Region, VerifyRegion,
    },
    hex::HexStore,
    interface::SerialTransport,
    logging::initialize_logger,
    programmer::Programmer,
    Error,
};

/// Main CLI parser.
#[derive(Debug, Parser)]
#[command(about, version, max_term_width = 100, disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    subcommand: Commands,

    /// Enable protocol and parser tracing
    #[arg(long, global = true)]
    debug: bool,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print chip names from the database
    ///
    /// The argument is matched as a case-insensitive substring of the chip
    /// name; `all` prints the whole database.
    List(ListArgs),
    /// Connect to the programmer and print its version and protocol
    Ping(PingArgs),
    /// Erase the whole chip
    Erase(EraseArgs),
    /// Read chip memory to an Intel-HEX file or stdout
    ///
    /// With `-o` the selected regions are collected into an Intel-HEX
    /// image; without it they are hex dumped to stdout. The special region
    /// `hex` does not touch the device at all and pretty-prints the
    /// segments of the `-i` file instead.
    Dump(DumpArgs),
    /// Program chip memory from an Intel-HEX file
    ///
    /// Every programmed region is read back and compared afterwards. When
    /// ROM, EEPROM and fuses are all selected on a flash chip, the chip is
    /// erased first.
    Program(ProgramArgs),
    /// Compare chip memory with an Intel-HEX file
    Verify(VerifyArgs),
    /// Check that a memory region is erased
    Isblank(IsblankArgs),
    /// Show what a program run would send, without any device access
    Dryrun(DryrunArgs),
    /// Convert between Intel-HEX and raw binary
    ///
    /// The address range is given in hex with both ends included, so
    /// `--range=0000-0FFF` covers 0x1000 bytes.
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Substring to match, or `all`
    #[arg(value_name = "FILTER")]
    filter: String,
    /// Chip database file
    #[arg(
        short = 'd',
        long = "datfile",
        value_name = "FILE",
        default_value = "picpro.dat"
    )]
    datfile: PathBuf,
}

#[derive(Debug, Args)]
struct PingArgs {
    #[command(flatten)]
    connect: ConnectArgs,
}

#[derive(Debug, Args)]
struct EraseArgs {
    #[command(flatten)]
    connect: ConnectArgs,
    #[command(flatten)]
    chip: ChipArgs,
}

#[derive(Debug, Args)]
struct DumpArgs {
    /// Memory regions to read
    #[arg(value_enum, value_name = "REGION")]
    region: DumpRegion,
    #[command(flatten)]
    connect: ConnectArgs,
    #[command(flatten)]
    chip: ChipArgs,
    /// Input Intel-HEX file (region `hex` only)
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: Option<PathBuf>,
    /// Output Intel-HEX file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ProgramArgs {
    /// Memory regions to program
    #[arg(value_enum, value_name = "REGION")]
    region: Region,
    #[command(flatten)]
    connect: ConnectArgs,
    #[command(flatten)]
    chip: ChipArgs,
    /// Input Intel-HEX file
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: PathBuf,
    /// ID bytes to program, as 2 to 16 hex characters
    #[arg(long = "id", value_parser = parse_id, value_name = "HEX")]
    id: Option<ChipId>,
}

#[derive(Debug, Args)]
struct VerifyArgs {
    /// Memory regions to compare
    #[arg(value_enum, value_name = "REGION")]
    region: VerifyRegion,
    #[command(flatten)]
    connect: ConnectArgs,
    #[command(flatten)]
    chip: ChipArgs,
    /// Input Intel-HEX file
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct IsblankArgs {
    /// Memory region to check
    #[arg(value_enum, value_name = "REGION")]
    region: BlankRegion,
    #[command(flatten)]
    connect: ConnectArgs,
    #[command(flatten)]
    chip: ChipArgs,
}

#[derive(Debug, Args)]
struct DryrunArgs {
    /// Memory regions to show
    #[arg(value_enum, value_name = "REGION")]
    region: Region,
    #[command(flatten)]
    chip: ChipArgs,
    /// Input Intel-HEX file
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: PathBuf,
    /// ID bytes to program, as 2 to 16 hex characters
    #[arg(long = "id", value_parser = parse_id, value_name = "HEX")]
    id: Option<ChipId>,
}

#[derive(Debug, Args)]
struct ConvertArgs {
    /// Conversion direction
    #[arg(value_enum, value_name = "MODE")]
    mode: ConvertMode,
    /// Input file
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    input: PathBuf,
    /// Output file
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: PathBuf,
    /// Address range to convert, hex, both ends included
    #[arg(long = "range", value_parser = parse_range, value_name = "BEG-END")]
    range: (u32, u32),
    /// Word used to fill gaps, hex
    #[arg(long = "blank", value_parser = parse_blank, value_name = "WORD", default_value = "0")]
    blank: u16,
    /// Swap the two bytes of each word
    #[arg(long)]
    swab: bool,
}

fn parse_id(arg: &str) -> Result<ChipId, String> {
    if arg.is_empty() || arg.len() % 2 != 0 || arg.len() > 16 {
        return Err(format!("invalid length for ID ({})", arg.len()));
    }
    (0..arg.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&arg[i..i + 2], 16)
                .map_err(|_| format!("invalid format for ID ({arg})"))
        })
        .collect::<Result<Vec<u8>, _>>()
        .map(ChipId)
}

fn parse_range(arg: &str) -> Result<(u32, u32), String> {
    let (beg, end) = arg
        .split_once('-')
        .ok_or_else(|| format!("invalid format for range ({arg})"))?;
    let beg = u32::from_str_radix(beg, 16).map_err(|_| format!("invalid range ({arg})"))?;
    let end = u32::from_str_radix(end, 16).map_err(|_| format!("invalid range ({arg})"))?;
    if end <= beg {
        return Err(format!("invalid range ({arg})"));
    }
    if beg % 2 != 0 {
        return Err(format!("range must start on a word boundary ({arg})"));
    }
    Ok((beg, end))
}

fn parse_blank(arg: &str) -> Result<u16, String> {
    u16::from_str_radix(arg, 16).map_err(|_| format!("invalid format for word blank ({arg})"))
}

fn main() -> Result<()> {
    // any failure, argument errors included, exits with status 1
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let code = i32::from(err.use_stderr());
        let _ = err.print();
        std::process::exit(code);
    });
    initialize_logger(if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    match cli.subcommand {
        Commands::List(args) => list(args),
        Commands::Ping(args) => ping(args),
        Commands::Erase(args) => erase(args),
        Commands::Dump(args) => dump(args),
        Commands::Program(args) => program(args),
        Commands::Verify(args) => verify(args),
        Commands::Isblank(args) => isblank(args),
        Commands::Dryrun(args) => dryrun(args),
        Commands::Convert(args) => convert(args),
    }
}

/// Builds a configured programmer and connects it to the board.
fn connect(connect: &ConnectArgs, chip: &ChipArgs) -> Result<Programmer<SerialTransport>, Error> {
    let props = cli::load_chip(chip)?;
    let mut programmer = Programmer::new(SerialTransport::new(&connect.port));
    programmer.configure(props);
    info!("Initializing programmer on port '{}'", connect.port);
    programmer.connect()?;
    Ok(programmer)
}

fn list(args: ListArgs) -> Result<()> {
    cli::list_chips(&args.datfile, &args.filter)?;
    Ok(())
}

fn ping(args: PingArgs) -> Result<()> {
    let mut programmer = Programmer::new(SerialTransport::new(&args.connect.port));
    cli::ping(&mut programmer)?;
    Ok(())
}

fn erase(args: EraseArgs) -> Result<()> {
    let mut programmer = connect(&args.connect, &args.chip)?;
    let result = cli::erase(&mut programmer, args.chip.icsp);
    programmer.disconnect();
    Ok(result?)
}

fn dump(args: DumpArgs) -> Result<()> {
    if args.region == DumpRegion::Hex {
        let input = args.input.ok_or_else(|| {
            Error::InvalidArgument("missing input file (-i)".into())
        })?;
        cli::dump_hex_file(&input)?;
        return Ok(());
    }

    let mut programmer = connect(&args.connect, &args.chip)?;
    let mut progress = CliProgress::new();
    let result = cli::dump(
        &mut programmer,
        args.chip.icsp,
        args.region.into(),
        args.output.as_deref(),
        Some(&mut progress),
    );
    programmer.disconnect();
    Ok(result?)
}

fn program(args: ProgramArgs) -> Result<()> {
    let mut hex = HexStore::new();
    hex.load_hex_file(&args.input).map_err(Error::from)?;
    let id = args.id.unwrap_or_default();

    let mut programmer = connect(&args.connect, &args.chip)?;
    let mut progress = CliProgress::new();
    let result = cli::program(
        &mut programmer,
        &hex,
        &id.0,
        args.chip.icsp,
        args.region.into(),
        Some(&mut progress),
    );
    programmer.disconnect();
    Ok(result?)
}

fn verify(args: VerifyArgs) -> Result<()> {
    let mut hex = HexStore::new();
    hex.load_hex_file(&args.input).map_err(Error::from)?;

    let mut programmer = connect(&args.connect, &args.chip)?;
    let mut progress = CliProgress::new();
    let result = cli::verify(
        &mut programmer,
        &hex,
        args.chip.icsp,
        args.region.into(),
        Some(&mut progress),
    );
    programmer.disconnect();
    Ok(result?)
}

fn isblank(args: IsblankArgs) -> Result<()> {
    let mut programmer = connect(&args.connect, &args.chip)?;
    let mut progress = CliProgress::new();
    let result = cli::isblank(&mut programmer, args.chip.icsp, args.region, Some(&mut progress));
    programmer.disconnect();
    Ok(result?)
}

fn dryrun(args: DryrunArgs) -> Result<()> {
    let mut hex = HexStore::new();
    hex.load_hex_file(&args.input).map_err(Error::from)?;
    let id = args.id.unwrap_or_default();
    let props = cli::load_chip(&args.chip)?;

    cli::dryrun(&props, &hex, &id.0, args.chip.icsp, args.region.into())?;
    Ok(())
}

fn convert(args: ConvertArgs) -> Result<()> {
    match args.mode {
        ConvertMode::Hex2raw => {
            cli::convert_hex2raw(&args.input, &args.output, args.range, args.blank, args.swab)?
        }
        ConvertMode::Raw2hex => {
            cli::convert_raw2hex(&args.input, &args.output, args.range, args.swab)?
        }
    }
    Ok(())
}
