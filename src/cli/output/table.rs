//! Table output formatting for CLI commands using comfy-table.

use std::collections::HashMap;
use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use uuid::Uuid;

use crate::domain::models::{Agent, Task, TaskStatus};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
        }
    }

    pub fn with_colors(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Format a list of tasks as a table. `names` maps task ids to the
    /// human-readable names from the taskfile, where known.
    pub fn format_tasks(&self, tasks: &[Task], names: &HashMap<Uuid, &str>) -> String {
        let mut table = create_base_table();
        table.set_header(vec![
            Cell::new("Task").add_attribute(Attribute::Bold),
            Cell::new("Kind").add_attribute(Attribute::Bold),
            Cell::new("Priority").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("Retries").add_attribute(Attribute::Bold),
            Cell::new("Detail").add_attribute(Attribute::Bold),
        ]);

        for task in tasks {
            let label = names
                .get(&task.id)
                .map_or_else(|| task.id.to_string()[..8].to_string(), ToString::to_string);

            let status_cell = if self.use_colors {
                Cell::new(task.status.as_str()).fg(status_color(task.status))
            } else {
                Cell::new(task.status.as_str())
            };

            let detail = match task.status {
                TaskStatus::Failed => task
                    .last_error
                    .as_ref()
                    .map_or(String::new(), |e| truncate_text(&e.message, 40)),
                TaskStatus::Cancelled => task
                    .cancel_reason
                    .as_ref()
                    .map_or(String::new(), |r| r.as_str().to_string()),
                _ => String::new(),
            };

            table.add_row(vec![
                Cell::new(label),
                Cell::new(task.kind.required_capability()),
                Cell::new(task.priority.as_str()),
                status_cell,
                Cell::new(format!("{}/{}", task.retry_count, task.max_retries)),
                Cell::new(detail),
            ]);
        }
        table.to_string()
    }

    /// Format the agent fleet as a table.
    pub fn format_agents(&self, agents: &[Agent]) -> String {
        let mut table = create_base_table();
        table.set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Type").add_attribute(Attribute::Bold),
            Cell::new("Capabilities").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("Load").add_attribute(Attribute::Bold),
        ]);

        for agent in agents {
            table.add_row(vec![
                Cell::new(&agent.id.to_string()[..8]),
                Cell::new(&agent.agent_type),
                Cell::new(agent.capabilities.join(", ")),
                Cell::new(agent.status.to_string()),
                Cell::new(format!("{}/{}", agent.load(), agent.max_concurrent_tasks)),
            ]);
        }
        table.to_string()
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn create_base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Cancelled => Color::DarkYellow,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Pending | TaskStatus::Eligible | TaskStatus::Assigned => Color::White,
    }
}

fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

fn supports_color() -> bool {
    env::var("NO_COLOR").is_err() && env::var("TERM").is_ok_and(|t| t != "dumb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tasks_includes_status() {
        let task = Task::new("demo work");
        let names = HashMap::from([(task.id, "demo")]);
        let output = TableFormatter::with_colors(false).format_tasks(&[task], &names);
        assert!(output.contains("demo"));
        assert!(output.contains("pending"));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("0123456789abc", 10), "0123456...");
    }
}
