use crate::model::ScanResult;
use anyhow::Result;

pub fn print_json(result: &ScanResult) -> Result<()> {
    println!("{}", generate_json_string(result)?);
    Ok(())
}

pub fn generate_json_string(result: &ScanResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}
