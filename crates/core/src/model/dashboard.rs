use crate::model::lab::LabSummary;
use crate::model::progress::LabStatus;

/// A lab as it appears on the student's dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardLab {
    pub summary: LabSummary,
    pub status: LabStatus,
    pub score: u32,
    /// The previous lab in order has been completed.
    pub can_start: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DashboardStats {
    pub total_labs: u32,
    pub completed_labs: u32,
    /// Percentage, 0–100.
    pub success_rate: f64,
    pub average_score: f64,
}

/// Student overview returned by the backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudentDashboard {
    pub stats: DashboardStats,
    pub labs: Vec<DashboardLab>,
}

impl StudentDashboard {
    /// First lab, in order, that can be worked on and is not completed yet.
    #[must_use]
    pub fn next_open_lab(&self) -> Option<&DashboardLab> {
        let mut labs: Vec<&DashboardLab> = self.labs.iter().collect();
        labs.sort_by_key(|lab| lab.summary.order);
        labs.into_iter()
            .find(|lab| lab.can_start && lab.status != LabStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, LabId};

    fn lab(id: u64, order: u32, status: LabStatus, can_start: bool) -> DashboardLab {
        DashboardLab {
            summary: LabSummary {
                id: LabId::new(id),
                title: format!("Lab {id}"),
                description: None,
                lab_number: order - 1,
                difficulty: Difficulty::Easy,
                max_score: 30,
                order,
            },
            status,
            score: 0,
            can_start,
        }
    }

    #[test]
    fn next_open_lab_skips_completed_and_blocked() {
        let dashboard = StudentDashboard {
            stats: DashboardStats::default(),
            labs: vec![
                lab(3, 3, LabStatus::NotStarted, false),
                lab(1, 1, LabStatus::Completed, true),
                lab(2, 2, LabStatus::InProgress, true),
            ],
        };
        assert_eq!(
            dashboard.next_open_lab().map(|l| l.summary.id),
            Some(LabId::new(2))
        );
    }

    #[test]
    fn nothing_open_when_all_done() {
        let dashboard = StudentDashboard {
            stats: DashboardStats::default(),
            labs: vec![lab(1, 1, LabStatus::Completed, true)],
        };
        assert!(dashboard.next_open_lab().is_none());
    }
}
