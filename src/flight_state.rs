//! C4: Flight-State Analyzer — pure decision-table derivation of phase,
//! ATC sector, and intent from telemetry and airspace context.
//!
//! Modeled on the teacher's `state_transitions.rs`, which is likewise a
//! set of free functions over plain structs rather than a stateful
//! object — this module carries no fields and holds no state.

use serde::Serialize;

use crate::airspace::AirspaceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Parked,
    Taxiing,
    GroundOps,
    Departure,
    FinalApproach,
    AirportPattern,
    TerminalArea,
    TerminalClimb,
    TerminalDescent,
    Takeoff,
    Approach,
    RapidClimb,
    RapidDescent,
    Climbing,
    Descending,
    SlowClimb,
    SlowDescent,
    HighCruise,
    Cruise,
    MediumLevel,
    InFlight,
}

/// Telemetry the analyzer consumes. All fields mirror `AircraftContact`
/// optional fields, defaulting to values that make the decision table
/// fall through to `InFlight` when data is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Telemetry<'a> {
    pub alt_baro: Option<f64>,
    pub ground_speed: Option<f64>,
    pub vert_rate: Option<f64>,
    pub squawk: Option<&'a str>,
}

/// Airspace context derived from C1's `classify` call for this point.
#[derive(Debug, Clone, Copy, Default)]
pub struct AirspaceContext {
    pub in_ctr: bool,
    pub in_tma_or_cta: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlightState {
    pub phase: Phase,
    pub atc_sector: String,
    pub intent: String,
}

/// Phase decision table, first matching row wins, per spec.md §4.4.
pub fn derive_phase(t: &Telemetry, ctx: &AirspaceContext) -> Phase {
    let alt = t.alt_baro.unwrap_or(0.0);
    let gs = t.ground_speed.unwrap_or(0.0);
    let vrate = t.vert_rate.unwrap_or(0.0);

    if alt < 100.0 && gs < 5.0 {
        return Phase::Parked;
    }
    if alt < 100.0 && gs < 25.0 {
        return Phase::Taxiing;
    }
    if alt < 100.0 && gs < 50.0 {
        return Phase::GroundOps;
    }
    if ctx.in_ctr && alt < 3000.0 && vrate > 800.0 {
        return Phase::Departure;
    }
    if ctx.in_ctr && alt < 3000.0 && vrate < -800.0 {
        return Phase::FinalApproach;
    }
    if ctx.in_ctr && alt < 3000.0 && gs < 200.0 {
        return Phase::AirportPattern;
    }
    if ctx.in_ctr && alt < 3000.0 {
        return Phase::TerminalArea;
    }
    if ctx.in_tma_or_cta && vrate > 1000.0 {
        return Phase::TerminalClimb;
    }
    if ctx.in_tma_or_cta && vrate < -1000.0 {
        return Phase::TerminalDescent;
    }
    if ctx.in_tma_or_cta && alt < 10_000.0 {
        return Phase::TerminalArea;
    }
    if alt < 3000.0 && vrate > 500.0 {
        return Phase::Takeoff;
    }
    if alt < 3000.0 && vrate < -500.0 {
        return Phase::Approach;
    }
    if vrate.abs() > 1500.0 {
        return if vrate > 0.0 { Phase::RapidClimb } else { Phase::RapidDescent };
    }
    if vrate.abs() > 800.0 {
        return if vrate > 0.0 { Phase::Climbing } else { Phase::Descending };
    }
    if vrate.abs() > 300.0 {
        return if vrate > 0.0 { Phase::SlowClimb } else { Phase::SlowDescent };
    }
    if alt > 35_000.0 {
        return Phase::HighCruise;
    }
    if alt > 20_000.0 {
        return Phase::Cruise;
    }
    if alt > 10_000.0 {
        return Phase::MediumLevel;
    }
    Phase::InFlight
}

/// ATC sector derivation from squawk, per spec.md §4.4.
fn derive_atc_sector(squawk: Option<&str>) -> String {
    let Some(code) = squawk else {
        return "NO_SQUAWK".to_string();
    };
    match code {
        "7500" => return "HIJACK".to_string(),
        "7600" => return "RADIO_FAILURE".to_string(),
        "7700" => return "EMERGENCY".to_string(),
        "7000" | "7004" | "7010" => return "VFR".to_string(),
        _ => {}
    }
    let Some(first_digit) = code.chars().next() else {
        return "ATC_ASSIGNED".to_string();
    };
    match first_digit {
        '0' => "London".to_string(),
        '1' => "Scottish".to_string(),
        '2' => "Manchester".to_string(),
        '3' => "London TC".to_string(),
        '4' => "Approach".to_string(),
        '5' => "Area".to_string(),
        '6' => "Terminal".to_string(),
        _ => "ATC_ASSIGNED".to_string(),
    }
}

/// Intent derivation from phase, airspace name, and squawk. `airspace_name`
/// is the primary zone's name when one is present (pre-resolved by the
/// caller from C1's `classify` output).
fn derive_intent(phase: Phase, airspace_name: Option<&str>, airspace_kind: Option<AirspaceKind>, atc_sector: &str) -> String {
    if atc_sector == "VFR" {
        return match phase {
            Phase::Cruise | Phase::HighCruise | Phase::MediumLevel => "VFR CROSS COUNTRY".to_string(),
            _ => "VFR LOCAL".to_string(),
        };
    }

    if let (Some(name), Some(kind)) = (airspace_name, airspace_kind) {
        match kind {
            AirspaceKind::Ctr => {
                return match phase {
                    Phase::Departure | Phase::Takeoff => format!("DEPARTING {name}"),
                    Phase::FinalApproach | Phase::Approach => format!("LANDING {name}"),
                    Phase::AirportPattern => format!("PATTERN {name}"),
                    Phase::Parked | Phase::Taxiing | Phase::GroundOps => format!("GROUND {name}"),
                    _ => format!("TERMINAL AREA {name}"),
                };
            }
            AirspaceKind::Tma | AirspaceKind::Cta => {
                return match phase {
                    Phase::TerminalClimb => format!("CLIMBING IN {name}"),
                    Phase::TerminalDescent => format!("DESCENDING TO {name}"),
                    _ => format!("TRANSITING {name}"),
                };
            }
            _ => {}
        }
    }

    match phase {
        Phase::Parked => "PARKED".to_string(),
        Phase::Taxiing => "TAXIING".to_string(),
        Phase::GroundOps => "GROUND OPERATIONS".to_string(),
        Phase::Takeoff | Phase::Departure => "DEPARTING".to_string(),
        Phase::Approach | Phase::FinalApproach => "APPROACHING".to_string(),
        Phase::Cruise | Phase::HighCruise | Phase::MediumLevel => "EN ROUTE".to_string(),
        _ => "IN FLIGHT".to_string(),
    }
}

/// Entry point: derive all three orthogonal labels from telemetry and
/// airspace context. `primary_zone` is the first hit from C1's
/// `classify`, if any.
pub fn classify(
    telemetry: &Telemetry,
    ctx: &AirspaceContext,
    primary_zone_name: Option<&str>,
    primary_zone_kind: Option<AirspaceKind>,
) -> FlightState {
    let phase = derive_phase(telemetry, ctx);
    let atc_sector = derive_atc_sector(telemetry.squawk);
    let intent = derive_intent(phase, primary_zone_name, primary_zone_kind, &atc_sector);
    FlightState { phase, atc_sector, intent }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_speed_zero_and_altitude_zero_is_parked() {
        let t = Telemetry { alt_baro: Some(0.0), ground_speed: Some(0.0), ..Default::default() };
        let phase = derive_phase(&t, &AirspaceContext::default());
        assert_eq!(phase, Phase::Parked);
    }

    #[test]
    fn high_climb_rate_in_ctr_is_departure() {
        let t = Telemetry { alt_baro: Some(1500.0), vert_rate: Some(1200.0), ..Default::default() };
        let ctx = AirspaceContext { in_ctr: true, in_tma_or_cta: false };
        assert_eq!(derive_phase(&t, &ctx), Phase::Departure);
    }

    #[test]
    fn high_altitude_is_high_cruise() {
        let t = Telemetry { alt_baro: Some(38_000.0), ground_speed: Some(450.0), vert_rate: Some(0.0), ..Default::default() };
        assert_eq!(derive_phase(&t, &AirspaceContext::default()), Phase::HighCruise);
    }

    #[test]
    fn emergency_squawk_sector_overrides_digit_mapping() {
        let sector = derive_atc_sector(Some("7700"));
        assert_eq!(sector, "EMERGENCY");
    }

    #[test]
    fn vfr_squawk_maps_local_or_cross_country() {
        assert_eq!(derive_atc_sector(Some("7000")), "VFR");
    }

    #[test]
    fn classify_carries_squawk_into_atc_sector() {
        let t = Telemetry { alt_baro: Some(38_000.0), ground_speed: Some(450.0), squawk: Some("7700"), ..Default::default() };
        let state = classify(&t, &AirspaceContext::default(), None, None);
        assert_eq!(state.atc_sector, "EMERGENCY");
    }
}
