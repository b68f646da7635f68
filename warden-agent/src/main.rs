use anyhow::Result;

fn main() -> Result<()> {
    warden_agent::cli::execute()
}
