//! Wire messages exchanged with the charger through the BT-2 module.
//!
//! The BT-2 bridges BLE to the charger's Modbus RTU interface. Only one request is ever sent: a
//! read of the 35 "dynamic data" holding registers starting at 0x100. The response arrives on the
//! notification characteristic as a standard Modbus frame:
//!
//! Start Byte | End Byte | Meaning
//! 0          | 0        | Device address (0xFF)
//! 1          | 1        | Function code (0x03)
//! 2          | 2        | Byte count of the register payload
//! 3          | x        | Register values, big endian, two bytes per register
//! x+1        | x+2      | MODBUS CRC over bytes 0-x

pub mod status_message;
