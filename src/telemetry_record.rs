use std::fmt;

/// The reported state of the charger, decoded from one status response
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    /// Auxiliary (house) battery voltage in V
    pub aux_batt_v: f64,
    /// Total charging current into the auxiliary battery in A
    pub combined_charging_amps: f64,
    /// Controller temperature in °C
    pub controller_temp: i8,
    /// Auxiliary battery temperature in °C
    pub battery_temp: i8,
    /// Alternator (starter battery) voltage in V
    pub alternator_v: f64,
    pub alternator_charging_amps: f64,
    pub alternator_charging_watts: u16,
    /// Solar panel voltage in V
    pub solar_v: f64,
    pub solar_charging_amps: f64,
    pub combined_charging_watts: u16,
    pub aux_batt_v_lowest_day: f64,
    pub aux_batt_v_highest_day: f64,
    pub charging_amps_highest_day: f64,
    pub input_power_highest_day: u16,
    /// Charge delivered today in Ah
    pub accumulated_ah_day: u16,
    /// Energy generated today in Wh
    pub generated_power_day: u16,
    pub total_working_days: u16,
    pub total_over_discharged_count: u16,
    pub total_fully_charged_count: u16,
    /// Lifetime charge delivered in Ah
    pub accumulated_ah_aux_batt: u32,
    /// Lifetime energy generated in Wh
    pub accumulated_generated_watts: u32,
    /// Raw charging state code, not interpreted here
    pub charging_state: u8,
    /// Raw fault bitmask (register 0x121)
    pub error_bits_1: u16,
    /// Raw fault bitmask (register 0x122)
    pub error_bits_2: u16,
    /// Solar input power in W, computed locally from `solar_charging_amps * solar_v`
    pub solar_input_watts: u32,
}

/// A single published value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Decimal(v) => write!(f, "{v}"),
        }
    }
}

impl TelemetryRecord {
    /// Every field by name, in register order with the derived field last.
    pub fn fields(&self) -> Vec<(&'static str, FieldValue)> {
        use FieldValue::{Decimal, Integer};

        vec![
            ("aux_batt_v", Decimal(self.aux_batt_v)),
            ("combined_charging_amps", Decimal(self.combined_charging_amps)),
            ("controller_temp", Integer(self.controller_temp.into())),
            ("battery_temp", Integer(self.battery_temp.into())),
            ("alternator_v", Decimal(self.alternator_v)),
            ("alternator_charging_amps", Decimal(self.alternator_charging_amps)),
            ("alternator_charging_watts", Integer(self.alternator_charging_watts.into())),
            ("solar_v", Decimal(self.solar_v)),
            ("solar_charging_amps", Decimal(self.solar_charging_amps)),
            ("combined_charging_watts", Integer(self.combined_charging_watts.into())),
            ("aux_batt_v_lowest_day", Decimal(self.aux_batt_v_lowest_day)),
            ("aux_batt_v_highest_day", Decimal(self.aux_batt_v_highest_day)),
            ("charging_amps_highest_day", Decimal(self.charging_amps_highest_day)),
            ("input_power_highest_day", Integer(self.input_power_highest_day.into())),
            ("accumulated_ah_day", Integer(self.accumulated_ah_day.into())),
            ("generated_power_day", Integer(self.generated_power_day.into())),
            ("total_working_days", Integer(self.total_working_days.into())),
            ("total_over_discharged_count", Integer(self.total_over_discharged_count.into())),
            ("total_fully_charged_count", Integer(self.total_fully_charged_count.into())),
            ("accumulated_ah_aux_batt", Integer(self.accumulated_ah_aux_batt.into())),
            ("accumulated_generated_watts", Integer(self.accumulated_generated_watts.into())),
            ("charging_state", Integer(self.charging_state.into())),
            ("error_bits_1", Integer(self.error_bits_1.into())),
            ("error_bits_2", Integer(self.error_bits_2.into())),
            ("solar_input_watts", Integer(self.solar_input_watts.into())),
        ]
    }
}
