//! Energy scan composition.
//!
//! Everything between the hardware seams and the user-facing scan calls:
//! trajectory synthesis, the live energy-request pump, the acquisition
//! bracket, the sequencer seam, and the coordinator that stages them.

pub mod coordinator;
pub mod daq;
pub mod energy_request;
pub mod sequencer;
pub mod trajectory;

pub use coordinator::{DurationScanParams, NdScanParams, ScanCoordinator, ScanDevices, ScanPhase};
pub use daq::DaqLifecycle;
pub use energy_request::EnergyRequestHandler;
pub use sequencer::{AxisGrid, AxisPoints, AxisRange, MotionSpec, Sequencer, StepHook, StepSequencer};
