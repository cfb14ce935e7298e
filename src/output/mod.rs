//! Console output for the command line front end

use std::time::{Duration, Instant};

use crate::model::{Execution, RegistryInfo, Task};
use crate::operation::ScheduleItem;

#[derive(Clone, Debug)]
pub struct OutputManager {
    pub verbose: bool,
    quiet: bool,
    start_time: Instant,
}

impl OutputManager {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
        }
    }

    pub fn new_quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
            start_time: Instant::now(),
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("INFO", message, "ℹ️");
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.print_with_timestamp("SUCCESS", message, "✅");
        }
    }

    pub fn warning(&self, message: &str) {
        self.print_with_timestamp("WARN", message, "⚠️");
    }

    pub fn error(&self, message: &str) {
        eprintln!("❌ {}", message);
    }

    pub fn section(&self, title: &str) {
        if self.quiet {
            return;
        }

        if self.verbose {
            let separator = "━".repeat(60);
            println!("\n{}", separator);
            println!("📋 {}", title);
            println!("{}", separator);
        } else {
            println!("\n📋 {}", title);
        }
    }

    pub fn step(&self, step: &str) {
        if self.verbose {
            println!("    🔸 {}", step);
        }
    }

    pub fn detail(&self, detail: &str) {
        if self.verbose {
            println!("      📝 {}", detail);
        }
    }

    pub fn summary(&self, title: &str, items: &[(&str, String)]) {
        if self.quiet {
            return;
        }

        println!("\n📊 {}", title);
        for (key, value) in items {
            println!("  • {}: {}", key, value);
        }
    }

    pub fn registry_info(&self, info: &RegistryInfo) {
        let join = |values: Vec<String>| {
            if values.is_empty() {
                "-".to_string()
            } else {
                values.join(", ")
            }
        };
        self.summary(
            &format!("Registry type {}", info.registry_type),
            &[
                (
                    "Resource types",
                    join(info.supported_resource_types.iter().map(|t| t.to_string()).collect()),
                ),
                (
                    "Filters",
                    join(
                        info.supported_resource_filters
                            .iter()
                            .map(|f| match f.values.is_empty() {
                                true => f.filter_type.to_string(),
                                false => format!("{} ({})", f.filter_type, f.values.join("|")),
                            })
                            .collect(),
                    ),
                ),
                (
                    "Triggers",
                    join(info.supported_triggers.iter().map(|t| t.to_string()).collect()),
                ),
            ],
        );
    }

    /// One line per planned source and destination pair
    pub fn schedule_items(&self, items: &[ScheduleItem]) {
        if self.quiet {
            return;
        }
        if items.is_empty() {
            println!("  (nothing to replicate)");
            return;
        }
        for item in items {
            let action = if item.dst_resource.deleted { "delete" } else { "copy" };
            println!(
                "  • {} {} -> {}",
                action,
                item.src_resource.display_name(),
                item.dst_resource.display_name()
            );
        }
    }

    pub fn execution(&self, execution: &Execution) {
        let duration = execution
            .end_time
            .map(|end| (end - execution.start_time).to_std().unwrap_or_default())
            .map(|d| self.format_duration(d))
            .unwrap_or_else(|| "-".to_string());
        let mut items = vec![
            ("Status", execution.status.to_string()),
            ("Trigger", execution.trigger.to_string()),
            (
                "Tasks",
                format!(
                    "{} total, {} succeeded, {} failed, {} stopped, {} in progress",
                    execution.total, execution.succeed, execution.failed, execution.stopped, execution.in_progress
                ),
            ),
            ("Duration", duration),
        ];
        if !execution.status_text.is_empty() {
            items.push(("Message", execution.status_text.clone()));
        }
        self.summary(&format!("Execution {}", execution.id), &items);
    }

    pub fn tasks(&self, tasks: &[Task]) {
        for task in tasks {
            self.detail(&format!(
                "task {} [{}] {} -> {} job={}",
                task.id,
                task.status,
                task.src_resource,
                task.dst_resource,
                task.job_id.as_deref().unwrap_or("-")
            ));
        }
    }

    fn print_with_timestamp(&self, level: &str, message: &str, emoji: &str) {
        if self.verbose {
            let timestamp = format!("[{:8.3}s]", self.start_time.elapsed().as_secs_f64());
            println!("{} {} {} {}", timestamp, emoji, level, message);
        } else {
            println!("{} {}", emoji, message);
        }
    }

    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{:02}s", secs / 60, secs % 60)
        } else {
            format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    pub fn elapsed_time(&self) -> String {
        self.format_duration(self.start_time.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        let output = OutputManager::new_quiet();
        assert_eq!(output.format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(output.format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(output.format_duration(Duration::from_secs(3725)), "1h02m05s");
    }
}
