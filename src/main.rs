#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::io::{self, BufRead, Write};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use cm4_serial_loader::dispatch::MENU;
use cm4_serial_loader::{Chunk, Dispatcher, Options, Outcome, Programmer, Prompt, BAUD_RATE};

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    /// Serial port to connect to
    #[structopt(short, long, default_value = "/dev/ttyACM0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "38400")]
    baud: usize,

    /// Commands to run before exiting, skips the interactive menu
    #[structopt(short, long)]
    command: Vec<String>,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

/// Reads command parameters from stdin
struct Console {
    progress: Option<ProgressBar>,
}

impl Console {
    fn ask(&mut self, question: &str) -> Result<String, String> {
        print!(" {}: ", question);
        io::stdout().flush().map_err(|e| e.to_string())?;

        let mut line = String::new();
        let n = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| e.to_string())?;
        if n == 0 {
            return Err("end of input".to_string());
        }

        Ok(line.trim().to_string())
    }

    fn ask_num(&mut self, question: &str) -> Result<u32, String> {
        let v = self.ask(question)?;
        v.parse::<u32>()
            .map_err(|_| format!("'{}' is not a number", v))
    }
}

fn parse_hex(v: &str) -> Result<u32, String> {
    let digits = v.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| format!("'{}' is not a hex address", v))
}

impl Prompt for Console {
    fn address(&mut self) -> Result<u32, String> {
        let v = self.ask("Type the base address (hex)")?;
        parse_hex(&v)
    }

    fn length(&mut self) -> Result<u32, String> {
        self.ask_num("Type the number of bytes (1 ~ 256)")
    }

    fn page_range(&mut self) -> Result<(u32, u32), String> {
        let page = self.ask_num("Type the page number (0 ~ 255)")?;
        let count = self.ask_num("Type the number of pages (0 ~ 255)")?;
        Ok((page, count))
    }

    fn pages(&mut self) -> Result<Vec<u32>, String> {
        let v = self.ask("Type the pages to protect (space separated, up to 32)")?;
        v.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u32>().map_err(|_| format!("'{}' is not a page", s)))
            .collect()
    }

    fn protection_level(&mut self) -> Result<u32, String> {
        self.ask_num("Type the protection level (0 ~ 2)")
    }

    fn file(&mut self) -> Result<Vec<u8>, String> {
        let path = self.ask("Type the file path")?;
        let data = std::fs::read(&path).map_err(|e| format!("{}: {}", path, e))?;

        println!(" Opened {} ({})", path, bytefmt::format(data.len() as u64));

        let bar = ProgressBar::new(data.len() as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{bar:40} {bytes}/{total_bytes} {msg}"),
        );
        self.progress = Some(bar);

        Ok(data)
    }

    fn chunk_sent(&mut self, chunk: &Chunk, _total: usize) {
        if let Some(bar) = &self.progress {
            bar.inc(chunk.len as u64);
            if chunk.last {
                bar.finish_with_message("done");
            }
        }
    }
}

fn print_menu() {
    println!(" +------------------------------------------+");
    println!(" |              CM4 BootLoader              |");
    println!(" +------------------------------------------+");
    for (i, (_, name)) in MENU.iter().enumerate() {
        println!(" | {:>2}  {:<36}|", i, name);
    }
    println!(" +------------------------------------------+");
}

fn report(outcome: &Outcome) {
    match outcome {
        Outcome::Memory { address, data } => {
            println!(" Memory at 0x{:08x}: {}", address, hex::encode(data))
        }
        Outcome::Ignored => (),
        other => println!(" {}", other),
    }
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if o.baud != BAUD_RATE {
        warn!("Bootloader expects {} baud, using {}", BAUD_RATE, o.baud);
    }

    info!("Connecting to serial port");

    let mut p = Programmer::linux(&o.port, o.baud, o.options.clone())
        .with_context(|| format!("Error connecting to serial port {}", o.port))?;

    info!("Serial port {} open", o.port);

    let mut console = Console { progress: None };
    let mut dispatcher = Dispatcher::new(&mut p);

    // Scripted commands
    if !o.command.is_empty() {
        for c in &o.command {
            let outcome = dispatcher
                .dispatch(c, &mut console)
                .with_context(|| format!("Command '{}' failed", c))?;
            report(&outcome);

            if outcome.is_terminal() {
                break;
            }
        }
        return Ok(());
    }

    print_menu();

    loop {
        println!();
        let id = match console.ask("Type the command code here") {
            Ok(id) => id,
            Err(e) => {
                error!("Error reading input: {}", e);
                break;
            }
        };

        match dispatcher.dispatch(&id, &mut console) {
            Ok(outcome) => {
                report(&outcome);
                if outcome.is_terminal() {
                    break;
                }
            }
            Err(e) => error!("{}", e),
        }
    }

    Ok(())
}
