use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeadStatus {
    Scheduled,
    Attended,
    NoShow,
    Converted,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeadError {
    #[error("unknown lead status: {0}")]
    UnknownStatus(String),
    #[error("cannot move a lead from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("only attended leads can be enrolled (current: {0})")]
    NotAttended(&'static str),
}

impl LeadError {
    pub fn code(&self) -> &'static str {
        match self {
            LeadError::UnknownStatus(_) => "bad_params",
            LeadError::InvalidTransition { .. } | LeadError::NotAttended(_) => "invalid_transition",
        }
    }
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 4] = [
        LeadStatus::Scheduled,
        LeadStatus::Attended,
        LeadStatus::NoShow,
        LeadStatus::Converted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Scheduled => "scheduled",
            LeadStatus::Attended => "attended",
            LeadStatus::NoShow => "noShow",
            LeadStatus::Converted => "converted",
        }
    }

    /// Moves staff can trigger by hand. Converted is reached only through
    /// enrollment, see [`LeadStatus::enroll`].
    pub fn next_statuses(self) -> &'static [LeadStatus] {
        match self {
            LeadStatus::Scheduled => &[LeadStatus::Attended, LeadStatus::NoShow],
            LeadStatus::NoShow => &[LeadStatus::Scheduled],
            LeadStatus::Attended => &[],
            LeadStatus::Converted => &[],
        }
    }

    pub fn transition(self, to: LeadStatus) -> Result<LeadStatus, LeadError> {
        if self.next_statuses().contains(&to) {
            Ok(to)
        } else {
            Err(LeadError::InvalidTransition {
                from: self.as_str(),
                to: to.as_str(),
            })
        }
    }

    pub fn enroll(self) -> Result<LeadStatus, LeadError> {
        match self {
            LeadStatus::Attended => Ok(LeadStatus::Converted),
            other => Err(LeadError::NotAttended(other.as_str())),
        }
    }

    pub fn can_enroll(self) -> bool {
        self == LeadStatus::Attended
    }
}

impl FromStr for LeadStatus {
    type Err = LeadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LeadStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| LeadError::UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_show_round_trip_then_conversion() {
        let s = LeadStatus::Scheduled;
        let s = s.transition(LeadStatus::NoShow).expect("scheduled -> noShow");
        let s = s.transition(LeadStatus::Scheduled).expect("noShow -> scheduled");
        let s = s.transition(LeadStatus::Attended).expect("scheduled -> attended");
        let s = s.enroll().expect("attended -> converted");
        assert_eq!(s, LeadStatus::Converted);
        assert!(s.next_statuses().is_empty());
        assert!(!s.can_enroll());
    }

    #[test]
    fn moves_are_one_directional() {
        assert!(LeadStatus::Attended.transition(LeadStatus::Scheduled).is_err());
        assert!(LeadStatus::NoShow.transition(LeadStatus::Attended).is_err());
        assert!(LeadStatus::Scheduled.transition(LeadStatus::Converted).is_err());
        assert!(LeadStatus::Scheduled.enroll().is_err());
        assert!(LeadStatus::NoShow.enroll().is_err());
        for to in LeadStatus::ALL {
            let err = LeadStatus::Converted.transition(to).expect_err("converted is terminal");
            assert_eq!(err.code(), "invalid_transition");
        }
        assert_eq!(
            LeadStatus::Converted.enroll(),
            Err(LeadError::NotAttended("converted"))
        );
    }

    #[test]
    fn status_names_parse_back() {
        for st in LeadStatus::ALL {
            assert_eq!(st.as_str().parse::<LeadStatus>(), Ok(st));
        }
        assert!("no_show".parse::<LeadStatus>().is_err());
    }
}
