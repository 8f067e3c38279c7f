/*!
# Progress Bars for Status Reports

[`ProgressReporter`] renders the [`FullStatusReport`]s of a dispatcher with `indicatif`: one bar
for the overall progress and one bar per worker, showing the first line of the worker's
report. Optionally the full human-readable report is also printed above the bars.

```rust,no_run
use mini_mhrw::progress::ProgressReporter;

let reporter = ProgressReporter::new(8);
let handler = reporter.handler();
// dispatcher.set_status_report_handler(handler);
// dispatcher.run()?;
reporter.finish();
# drop(handler);
```
*/

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex, PoisonError};

use crate::dispatch::FullStatusReport;

/// Resolution of the bars; positions are fractions scaled to this length.
const BAR_LENGTH: u64 = 1000;

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

fn position(fraction: f64) -> u64 {
    (fraction.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64
}

/// Shows dispatcher status reports as progress bars. Clones share the same bars.
#[derive(Clone)]
pub struct ProgressReporter {
    multi: MultiProgress,
    total: ProgressBar,
    workers: Arc<Mutex<Vec<ProgressBar>>>,
    print_reports: bool,
}

impl ProgressReporter {
    /// Draws to stderr. `num_total_runs` only labels the overall bar until the first report.
    pub fn new(num_total_runs: usize) -> Self {
        Self::with_draw_target(num_total_runs, ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(num_total_runs: usize, target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let total = multi.add(ProgressBar::new(BAR_LENGTH));
        total.set_style(bar_style());
        total.set_prefix("Total   ");
        total.set_message(format!("0/{num_total_runs} runs completed"));
        Self {
            multi,
            total,
            workers: Arc::new(Mutex::new(Vec::new())),
            print_reports: false,
        }
    }

    /// Also print each report's [`FullStatusReport::human_report`] above the bars.
    pub fn with_printed_reports(mut self, print_reports: bool) -> Self {
        self.print_reports = print_reports;
        self
    }

    /// Updates the bars from `report`.
    pub fn update(&self, report: &FullStatusReport) {
        self.total.set_position(position(report.total_fraction_done()));
        self.total.set_message(format!(
            "{}/{} runs completed",
            report.num_completed, report.num_total_runs
        ));

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        while workers.len() < report.workers_reports.len() {
            let pb = self.multi.add(ProgressBar::new(BAR_LENGTH));
            pb.set_style(bar_style());
            pb.set_prefix(format!("Worker {:<2}", workers.len()));
            workers.push(pb);
        }
        for (k, pb) in workers.iter().enumerate() {
            let running = report.workers_running.get(k).copied().unwrap_or(false);
            match report.workers_reports.get(k).and_then(Option::as_ref) {
                Some(r) if running => {
                    pb.set_position(position(r.fraction_done));
                    pb.set_message(r.msg.lines().next().unwrap_or("").to_string());
                }
                _ => {
                    pb.set_position(0);
                    pb.set_message("<idle>");
                }
            }
        }
        drop(workers);

        if self.print_reports {
            // println on a hidden target is a no-op
            let _ = self.multi.println(report.human_report());
        }
    }

    /// A status report handler for [`TaskDispatcher::set_status_report_handler`].
    ///
    /// [`TaskDispatcher::set_status_report_handler`]: crate::dispatch::TaskDispatcher::set_status_report_handler
    pub fn handler(&self) -> impl FnMut(&FullStatusReport) + Send + 'static {
        let reporter = self.clone();
        move |report: &FullStatusReport| reporter.update(report)
    }

    /// Completes the overall bar and removes the worker bars.
    pub fn finish(&self) {
        let workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for pb in workers.iter() {
            pb.finish_and_clear();
        }
        self.total.set_position(BAR_LENGTH);
        self.total.finish();
    }

    pub fn total_bar(&self) -> &ProgressBar {
        &self.total
    }

    pub fn num_worker_bars(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TaskStatusReport;
    use std::time::Duration;

    fn hidden_reporter() -> ProgressReporter {
        ProgressReporter::with_draw_target(4, ProgressDrawTarget::hidden())
    }

    #[test]
    fn test_update_sets_positions_and_messages() {
        let reporter = hidden_reporter();
        let report = FullStatusReport {
            num_completed: 1,
            num_total_runs: 4,
            elapsed: Duration::from_secs(3),
            workers_running: vec![true, false],
            workers_reports: vec![
                Some(TaskStatusReport::new(0.5, "run sweep 3 / 6\n    details")),
                None,
            ],
        };
        let mut handler = reporter.handler();
        handler(&report);

        // (1 + 0.5) / 4
        assert_eq!(reporter.total_bar().position(), 375);
        assert_eq!(reporter.total_bar().message(), "1/4 runs completed");
        assert_eq!(reporter.num_worker_bars(), 2);
        {
            let workers = reporter.workers.lock().unwrap();
            assert_eq!(workers[0].position(), 500);
            assert_eq!(workers[0].message(), "run sweep 3 / 6");
            assert_eq!(workers[1].message(), "<idle>");
        }

        reporter.finish();
        assert!(reporter.total_bar().is_finished());
        assert_eq!(reporter.total_bar().position(), BAR_LENGTH);
    }

    #[test]
    fn test_position_is_clamped() {
        assert_eq!(position(-0.5), 0);
        assert_eq!(position(0.25), 250);
        assert_eq!(position(2.0), BAR_LENGTH);
    }
}
