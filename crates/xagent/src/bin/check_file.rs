//! `check_file <paths...>`: prints `{"<path>":exists,...}` in argument order

use std::path::Path;

use serde_json::{Map, Value};

fn main() -> anyhow::Result<()> {
    let mut results = Map::new();
    for path in std::env::args().skip(1) {
        let exists = Path::new(&path).exists();
        results.insert(path, Value::Bool(exists));
    }
    println!("{}", serde_json::to_string(&results)?);
    Ok(())
}
