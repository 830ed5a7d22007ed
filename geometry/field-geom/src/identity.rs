/// Process identity, derived from the board serial number.
///
/// Each deployed board maps to a fixed camera-and-role slot. An
/// unrecognized serial gets [`Identity::Unknown`], which switches the
/// telemetry client to localhost and selects the fake gyro so the
/// stack can run on a development machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identity {
    BetaFront,
    GammaIntake,
    Shooter,
    LeftAmp,
    GamePiece,
    Unknown,
}

impl Identity {
    pub fn from_serial(serial: &str) -> Identity {
        match serial {
            "10000000caeaae82" => Identity::BetaFront,
            "10000000a7c673d9" => Identity::GammaIntake,
            "10000000a7a892c0" => Identity::Shooter,
            "100000004e0a1fb9" => Identity::LeftAmp,
            "1000000013c9c96c" => Identity::GamePiece,
            _ => Identity::Unknown,
        }
    }

    /// Read the `Serial` line of `/proc/cpuinfo` and map it.
    pub fn detect() -> Identity {
        match read_cpuinfo_serial() {
            Some(serial) => Identity::from_serial(&serial),
            None => Identity::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Identity::BetaFront => "beta-front",
            Identity::GammaIntake => "gamma-intake",
            Identity::Shooter => "shooter",
            Identity::LeftAmp => "left-amp",
            Identity::GamePiece => "game-piece",
            Identity::Unknown => "unknown",
        }
    }
}

fn read_cpuinfo_serial() -> Option<String> {
    let contents = std::fs::read_to_string("/proc/cpuinfo").ok()?;
    parse_cpuinfo_serial(&contents)
}

fn parse_cpuinfo_serial(contents: &str) -> Option<String> {
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("Serial") {
            if let Some((_, value)) = rest.split_once(':') {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}
