use std::fmt;
use strum_macros::Display;

pub mod chain {
  /// Every account on the network is a bech32 string starting with this prefix.
  pub static ADDRESS_PREFIX: &str = "claw1";
  /// Number of characters taken from the start of an address occurrence,
  /// prefix included.
  pub static ADDRESS_SLICE_LEN: usize = 62;
  pub static DEFAULT_PAGE_SIZE: u32 = 100;
}

pub static JOB_STATUS_TOKENS: [&str; 5] = ["Open", "InNegotiation", "Matched", "Closed", "Expired"];

pub static AGREEMENT_STATUS_TOKENS: [&str; 5] = ["PendingFunding", "Active", "NoticePeriod", "Terminated", "Completed"];

static MUTABLE_JOB_FUNCTIONS: [&str; 9] = [
  "createJob",
  "apply",
  "proposeOffer",
  "counterOffer",
  "rejectOffer",
  "withdrawOffer",
  "acceptOffer",
  "cancelJob",
  "expireJob",
];

static MUTABLE_ESCROW_FUNCTIONS: [&str; 12] = [
  "activateAgreement",
  "fundEmployerRunway",
  "fundWorkerBond",
  "topUpRunway",
  "claimRecurringPay",
  "submitMilestone",
  "approveMilestone",
  "rejectMilestone",
  "autoApproveMilestone",
  "depositRevenue",
  "requestTerminate",
  "finalizeTerminate",
];

/// The two contracts whose transaction feeds are indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Contract {
  JobBoard,
  WorkEscrow,
}

impl Contract {
  pub fn mutable_functions(&self) -> &'static [&'static str] {
    match *self {
      Contract::JobBoard => &MUTABLE_JOB_FUNCTIONS,
      Contract::WorkEscrow => &MUTABLE_ESCROW_FUNCTIONS,
    }
  }

  pub fn is_mutable(&self, function: &str) -> bool {
    self.mutable_functions().contains(&function)
  }

  /// The call that creates a new entity without naming its id.
  pub fn creation_function(&self) -> &'static str {
    match *self {
      Contract::JobBoard => "createJob",
      Contract::WorkEscrow => "activateAgreement",
    }
  }
}

impl fmt::Display for Contract {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      Contract::JobBoard => write!(f, "job-board"),
      Contract::WorkEscrow => write!(f, "work-escrow"),
    }
  }
}

/// Read-only contract views queried through the gateway.
#[derive(Display, Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
  #[strum(serialize = "getJob")]
  GetJob,
  #[strum(serialize = "getBoardStats")]
  GetBoardStats,
  #[strum(serialize = "getAgreement")]
  GetAgreement,
  #[strum(serialize = "getAgentReputation")]
  GetAgentReputation,
  #[strum(serialize = "getProtocolStats")]
  GetProtocolStats,
}
