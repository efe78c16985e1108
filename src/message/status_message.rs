use crate::error::DecodeError;
use crate::telemetry_record::TelemetryRecord;
use crc16::{State, MODBUS};

/// Modbus address the BT-2 answers on
const DEVICE_ADDRESS: u8 = 0xFF;
const READ_HOLDING_REGISTERS: u8 = 0x03;
/// First register of the dynamic data block
const FIRST_REGISTER: u16 = 0x0100;
const REGISTER_COUNT: u16 = 35;

/// Bytes a response must contain for every decoded field to be present.
/// The two CRC bytes that follow are not required.
pub const MIN_RESPONSE_LEN: usize = 73;

/// Build the request for the dynamic data block: `FF 03 01 00 00 23 10 31`.
pub fn request() -> [u8; 8] {
    let [start_hi, start_lo] = FIRST_REGISTER.to_be_bytes();
    let [count_hi, count_lo] = REGISTER_COUNT.to_be_bytes();
    let body = [
        DEVICE_ADDRESS,
        READ_HOLDING_REGISTERS,
        start_hi,
        start_lo,
        count_hi,
        count_lo,
    ];
    let [crc_lo, crc_hi] = State::<MODBUS>::calculate(&body).to_le_bytes();

    [body[0], body[1], body[2], body[3], body[4], body[5], crc_lo, crc_hi]
}

/// Decode a status response into a [`TelemetryRecord`].
///
/// Either every field is decoded or an error is returned. Register 0x100 and the reserved
/// registers between fields are skipped without looking at their content.
pub fn decode(data: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    Ok(StatusMessage::new(data)?.record())
}

/// A response to [`request`], validated to be long enough for every field offset.
struct StatusMessage<'a>(&'a [u8]);

impl<'a> StatusMessage<'a> {
    fn new(data: &'a [u8]) -> Result<Self, DecodeError> {
        if data.len() < MIN_RESPONSE_LEN {
            return Err(DecodeError::Truncated {
                len: data.len(),
                required: MIN_RESPONSE_LEN,
            });
        }
        Ok(Self(data))
    }

    fn u8_at(&self, offset: usize) -> u8 {
        self.0[offset]
    }

    fn i8_at(&self, offset: usize) -> i8 {
        i8::from_be_bytes([self.0[offset]])
    }

    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.0[offset], self.0[offset + 1]])
    }

    fn u32_at(&self, offset: usize) -> u32 {
        u32::from_be_bytes([
            self.0[offset],
            self.0[offset + 1],
            self.0[offset + 2],
            self.0[offset + 3],
        ])
    }

    /// A register holding tenths of a unit
    fn tenths_at(&self, offset: usize) -> f64 {
        f64::from(self.u16_at(offset)) / 10.0
    }

    /// A register holding hundredths of a unit
    fn hundredths_at(&self, offset: usize) -> f64 {
        f64::from(self.u16_at(offset)) / 100.0
    }

    fn record(&self) -> TelemetryRecord {
        let solar_v = self.tenths_at(17);
        let solar_charging_amps = self.hundredths_at(19);

        TelemetryRecord {
            aux_batt_v: self.tenths_at(5),
            combined_charging_amps: self.hundredths_at(7),
            controller_temp: self.i8_at(9),
            battery_temp: self.i8_at(10),
            alternator_v: self.tenths_at(11),
            alternator_charging_amps: self.hundredths_at(13),
            alternator_charging_watts: self.u16_at(15),
            solar_v,
            solar_charging_amps,
            combined_charging_watts: self.u16_at(21),
            // 0x10A reserved
            aux_batt_v_lowest_day: self.tenths_at(25),
            aux_batt_v_highest_day: self.tenths_at(27),
            charging_amps_highest_day: self.hundredths_at(29),
            // 0x10E reserved
            input_power_highest_day: self.u16_at(33),
            // 0x110 reserved
            accumulated_ah_day: self.u16_at(37),
            // 0x112 reserved
            generated_power_day: self.u16_at(41),
            // 0x114 reserved
            total_working_days: self.u16_at(45),
            total_over_discharged_count: self.u16_at(47),
            total_fully_charged_count: self.u16_at(49),
            accumulated_ah_aux_batt: self.u32_at(51),
            // 0x11A, 0x11B reserved
            accumulated_generated_watts: self.u32_at(59),
            // 0x11E, 0x11F and the high byte of 0x120 reserved
            charging_state: self.u8_at(68),
            error_bits_1: self.u16_at(69),
            error_bits_2: self.u16_at(71),
            solar_input_watts: solar_input_watts(solar_charging_amps, solar_v),
        }
    }
}

/// Input power from the panel, from the already scaled current and voltage
fn solar_input_watts(amps: f64, volts: f64) -> u32 {
    (amps * volts).round() as u32
}
