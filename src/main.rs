use clap::Parser;
use color_eyre::eyre;
use cpucachesim::{config, Simulator};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    version,
    about = "cycle-level simulation of a single data cache",
    arg_required_else_help = false
)]
pub struct Options {
    /// Cache configuration (JSON). Defaults are used when omitted.
    #[clap(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Number of requests to drive through the cache.
    #[clap(short = 'n', long = "requests", default_value = "1000")]
    pub num_requests: usize,

    /// Byte distance between consecutive request addresses.
    #[clap(long = "stride", default_value = "64")]
    pub stride: u64,

    /// First request address.
    #[clap(long = "base", default_value = "0")]
    pub base: u64,

    /// Every n-th request is a write (0 disables writes).
    #[clap(long = "write-every", default_value = "4")]
    pub write_every: usize,

    /// Request size in bytes.
    #[clap(long = "size", default_value = "4")]
    pub req_size: u32,
}

fn parse_config(options: &Options) -> eyre::Result<config::Config> {
    let Some(path) = &options.config else {
        return Ok(config::Config::default());
    };
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let config = serde_json::from_reader(reader)?;
    Ok(config)
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let start = std::time::Instant::now();
    let options = Options::parse();
    let config = parse_config(&options)?;
    let num_ports = config.num_cpu_ports;
    let mut sim = Simulator::new(config)?;

    let mut issued = 0;
    let mut completed = 0;
    while completed < options.num_requests {
        while issued < options.num_requests {
            let port_id = issued % num_ports;
            let addr = options.base + issued as u64 * options.stride;
            let sent = if options.write_every != 0 && issued % options.write_every == 0 {
                sim.send_write(port_id, addr, vec![0xab; options.req_size as usize])
            } else {
                sim.send_read(port_id, addr, options.req_size)
            };
            if sent.is_none() {
                break;
            }
            issued += 1;
        }

        sim.cycle();
        for port_id in 0..num_ports {
            while sim.pop_response(port_id).is_some() {
                completed += 1;
            }
        }
    }
    sim.run_to_completion();

    let stats = sim.stats();
    eprintln!("completed {completed} requests in {:?}", start.elapsed());
    eprintln!("{stats}");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
