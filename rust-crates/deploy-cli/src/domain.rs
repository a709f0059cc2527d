use regex::Regex;
use std::sync::LazyLock;

static NAME_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Name\s+([^\n]+)").ok());
static FOUND_PROJECT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Found Project [^/]+/([^\n]+)").ok());

pub fn project_domain(name: &str) -> String {
    format!("{}.vercel.app", name.trim())
}

/// Project name from `vercel project inspect` output.
pub fn name_from_inspect(output: &str) -> Option<String> {
    [&*NAME_LINE, &*FOUND_PROJECT].into_iter().flatten().find_map(|re| {
        re.captures(output)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_owned())
            .filter(|name| !name.is_empty())
    })
}

/// Used when neither the API nor the CLI reveals the project name.
pub fn fallback_domain(project_id: &str) -> String {
    let chars: Vec<char> = project_id.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(8)..].iter().collect();
    format!("project-{tail}.vercel.app")
}
