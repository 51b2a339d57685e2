use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::Parser;
use log::{debug, info};
use lwfuture::executor::{pool::PoolConfig, serializing::ResultSerializingExecutor};
use rand::Rng;

/// Deliver results in submission order.
///
/// Submits computations that finish after a random delay to a result
/// serializing executor and prints their results as they are delivered.
#[derive(Parser, Debug)]
struct Args {
    /// How many computations to submit.
    #[arg(short, long, default_value_t = 64)]
    tasks: usize,

    /// Worker threads running the computations.
    #[arg(short = 'j', long, default_value_t = 8)]
    threads: usize,

    /// Upper bound of the random delay of each computation, in milliseconds.
    #[arg(short, long, default_value_t = 50)]
    max_delay: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = PoolConfig::default().threads(args.threads).name("demo");
    let rse = ResultSerializingExecutor::with_config(config);

    let finished = Arc::new(Mutex::new(Vec::with_capacity(args.tasks)));
    let start = Instant::now();

    for i in 0..args.tasks {
        let max_delay = args.max_delay.max(1);
        let finished = finished.clone();

        rse.submit(move || {
            let delay = rand::thread_rng().gen_range(0..max_delay);
            thread::sleep(Duration::from_millis(delay));
            finished.lock().unwrap().push(i);
            Ok::<_, String>((i, delay))
        })
        .context("Could not submit computation")?
        .on_done(move |f| match f.get() {
            Ok((i, delay)) => println!("{i:>5} delivered after {delay}ms"),
            Err(e) => println!("{i:>5} {e}"),
        });
    }

    debug!("Submitted {} computations", args.tasks);
    rse.close();

    let finished = finished.lock().unwrap();
    let overtaken = finished.windows(2).filter(|w| w[0] > w[1]).count();

    info!(
        "{} computations in {:?}, {overtaken} finished ahead of an earlier one",
        finished.len(),
        start.elapsed()
    );

    Ok(())
}
