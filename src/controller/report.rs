//! Merge-request comment text.


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Diff,
    Apply,
}

impl Operation {
    fn verb(&self) -> &'static str {
        match self {
            Operation::Diff => "diff",
            Operation::Apply => "apply",
        }
    }

    fn details_label(&self) -> &'static str {
        match self {
            Operation::Diff => "Show Diffs",
            Operation::Apply => "Show Apply Logs",
        }
    }
}

/// Output of one release operation for one chart environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub chart: String,
    pub environment: String,
    pub output: String,
}

const APPLY_HINT: &str = "* ⏩ To **apply all diffs** from this pull request, comment:\n  * `sparrow apply`\n\
* ⏩ To **apply specific diffs** from this pull request, comment:\n  * `sparrow apply -f <chart>@<environment>`\n";

/// Summary list followed by a collapsible block per chart environment.
pub fn render(operation: Operation, outcomes: &[ReleaseOutcome]) -> String {
    let mut summary = format!("Ran {} for {} charts:\n", operation.verb(), outcomes.len());
    let mut details = String::new();

    for (i, outcome) in outcomes.iter().enumerate() {
        let heading = format!(
            "{}. `{}` environment: `{}`",
            i + 1,
            outcome.chart,
            outcome.environment
        );
        summary.push_str(&heading);
        summary.push('\n');
        details.push_str(&format!(
            "## {heading}\n<details><summary>{}</summary>\n\n```\n{}\n```\n\n</details>\n\n",
            operation.details_label(),
            outcome.output
        ));
    }

    match operation {
        Operation::Diff => format!("{summary}\n\n{details}\n\n---\n{APPLY_HINT}"),
        Operation::Apply => format!("{summary}\n\n{details}\n"),
    }
}

pub fn sparrowfile_missing(file_name: &str, operation: Operation) -> String {
    format!(
        "No `{file_name}` was found at the repo base. Cannot {} these changes.",
        action(operation)
    )
}

pub fn cluster_not_defined(cluster: &str, operation: Operation) -> String {
    format!(
        "Cluster `{cluster}` is not defined in the sparrowfile. Cannot {} these changes.",
        action(operation)
    )
}

pub fn configuration_not_found(chart: &str, operation: Operation) -> String {
    format!(
        "Configuration applicable to `{chart}` were not found in the sparrowfile. Cannot {} this chart.",
        action(operation)
    )
}

pub fn unknown_environment(environment: &str, chart: &str) -> String {
    format!(
        "Environment `{environment}` not found in the chart configuration for `{chart}`. Cannot apply changes..."
    )
}

pub fn unmatched_targets(targets: &[String]) -> String {
    let list = targets
        .iter()
        .map(|t| format!("`{t}`"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("The following targets do not match any chart changed in this merge request and were skipped: {list}")
}

pub fn authentication_failed(error: &dyn std::fmt::Display) -> String {
    format!("Could not authenticate with cluster: {error}")
}

fn action(operation: Operation) -> &'static str {
    match operation {
        Operation::Diff => "generate diff for",
        Operation::Apply => "apply",
    }
}
