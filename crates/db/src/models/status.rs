//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding lookup table created by the initial migration.

use serde::Serialize;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Lower-case name, as stored in the lookup table.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $label ),+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = String;

            fn try_from(value: StatusId) -> Result<Self, Self::Error> {
                match value {
                    $( $val => Ok(Self::$variant), )+
                    other => Err(format!(
                        concat!("unknown ", stringify!($name), " id {}"),
                        other
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

define_status_enum! {
    /// Task lifecycle status.
    TaskStatus {
        Pending = 1 => "pending",
        Processing = 2 => "processing",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
    }
}

define_status_enum! {
    /// Job lifecycle status.
    JobStatus {
        Pending = 1 => "pending",
        Processing = 2 => "processing",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
        /// Abandoned in favour of a fresh retry row. Excluded from every count.
        Requeued = 5 => "requeued",
    }
}

define_status_enum! {
    /// Kind of ledger movement.
    TransactionType {
        Purchase = 1 => "purchase",
        Usage = 2 => "usage",
        Refund = 3 => "refund",
        Bonus = 4 => "bonus",
    }
}

impl TaskStatus {
    /// `completed` or `failed`; such a task never changes status again.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl JobStatus {
    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `pending` or `processing`.
    pub fn is_outstanding(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_lookup() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Requeued,
        ] {
            assert_eq!(JobStatus::try_from(s.id()), Ok(s));
        }
    }

    #[test]
    fn unknown_id_is_rejected() {
        assert!(TaskStatus::try_from(99).is_err());
    }

    #[test]
    fn serializes_as_snake_case_name() {
        let v = serde_json::to_value(TaskStatus::Processing).unwrap();
        assert_eq!(v, serde_json::json!("processing"));
        assert_eq!(TransactionType::Refund.to_string(), "refund");
    }

    #[test]
    fn terminal_classification() {
        assert!(TaskStatus::Failed.is_final());
        assert!(!TaskStatus::Processing.is_final());
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Requeued.is_terminal());
        assert!(!JobStatus::Requeued.is_outstanding());
        assert!(JobStatus::Pending.is_outstanding());
    }
}
