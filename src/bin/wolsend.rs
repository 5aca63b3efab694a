use wolretry::config::Policy;
use wolretry::host::{Lifecycle, MonotonicClock};
use wolretry::net;
use wolretry::scheduler::{Outcome, Scheduler};
use wolretry::wol::MacAddress;
use std::env;

fn usage(args: &[String]) -> String {
    let prog = args.first().map_or("wolsend", String::as_str);
    format!("usage: {} MAC [INTERFACE]", prog)
}

fn sent_message(target: &MacAddress) -> String {
    format!("sent magic packet to {}", target)
}

// Sends a single magic packet: `wolsend AA:BB:CC:DD:EE:FF [interface]`
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        return Err(usage(&args).into());
    }

    let target: MacAddress = args[1].parse()?;
    let policy = Policy {
        target,
        ..Policy::default()
    };
    let transport = net::UdpBroadcast::new(args.get(2).cloned());
    let mut scheduler = Scheduler::new(policy, Box::new(MonotonicClock::new()), Box::new(transport));
    scheduler.on_init();
    match scheduler.on_command() {
        Outcome::Skipped(e) => Err(e.into()),
        _ => {
            println!("{}", sent_message(&target));
            Ok(())
        }
    }
}
