//! `get_os_info`: prints the agent version and a short host description

fn main() -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(&xagent::host::os_info())?);
    Ok(())
}
