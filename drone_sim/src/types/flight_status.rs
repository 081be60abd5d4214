/// Flight state of a vehicle, with the navigation mode folded in while airborne.

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FlightStatus {
    Grounded,
    Drifting,
    Seeking,
}

impl FlightStatus {
    /// Converts the `FlightStatus` variant to its corresponding string representation.
    pub fn as_str(&self) -> &str {
        match self {
            FlightStatus::Grounded => "grounded",
            FlightStatus::Drifting => "drifting",
            FlightStatus::Seeking => "seeking",
        }
    }
}
