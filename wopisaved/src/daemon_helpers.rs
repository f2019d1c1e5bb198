fn report_line(report: &SessionReport) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(report).context("failed to encode report")?;
    line.push('\n');
    Ok(line)
}

fn read_optional_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
