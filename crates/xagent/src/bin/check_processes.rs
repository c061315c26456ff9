//! `check_processes <pids...>`: prints `{"<pid>":alive,...}` in argument order

use serde_json::{Map, Value};

fn main() -> anyhow::Result<()> {
    let mut results = Map::new();
    for pid in std::env::args().skip(1) {
        let alive = pid.parse::<u32>().map_or(false, xagent::host::is_alive);
        results.insert(pid, Value::Bool(alive));
    }
    println!("{}", serde_json::to_string(&results)?);
    Ok(())
}
