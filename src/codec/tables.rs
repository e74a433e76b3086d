//! Static hardware message table
//!
//! Tracks the firmware's message type list. Field layouts are MSB-first;
//! `time` is the sender's millisecond counter (24 or 16 bits wide).

use super::field::{EnumTable, Field, Scale};
use super::schema::{Schema, SchemaRegistry};
use crate::error::SchemaError;
use std::sync::Arc;

pub const GENERAL_CMD: u16 = 0x03;
pub const ACTUATOR_CMD: u16 = 0x06;
pub const ALT_ARM_CMD: u16 = 0x0A;
pub const DEBUG_MSG: u16 = 0x0C;
pub const DEBUG_PRINTF: u16 = 0x0F;
pub const ALT_ARM_STATUS: u16 = 0x22;
pub const ACTUATOR_STATUS: u16 = 0x23;
pub const GENERAL_BOARD_STATUS: u16 = 0x29;
pub const SENSOR_TEMP: u16 = 0x2A;
pub const SENSOR_ALTITUDE: u16 = 0x2B;
pub const SENSOR_ACC: u16 = 0x2C;
pub const SENSOR_ACC2: u16 = 0x2D;
pub const SENSOR_GYRO: u16 = 0x2F;
pub const SENSOR_MAG: u16 = 0x32;
pub const SENSOR_ANALOG: u16 = 0x35;
pub const GPS_TIMESTAMP: u16 = 0x36;
pub const GPS_LATITUDE: u16 = 0x37;
pub const GPS_LONGITUDE: u16 = 0x38;
pub const GPS_ALTITUDE: u16 = 0x39;
pub const GPS_INFO: u16 = 0x3A;
pub const FILL_LVL: u16 = 0x3C;
pub const LEDS_OFF: u16 = 0x3E;
pub const LEDS_ON: u16 = 0x3F;

const BOARD_TYPES: &[(&str, u64)] = &[
    ("DUMMY", 0x00),
    ("INJECTOR", 0x01),
    ("INJECTOR_SPARE", 0x02),
    ("LOGGER", 0x03),
    ("LOGGER_SPARE", 0x04),
    ("RADIO", 0x05),
    ("RADIO_SPARE", 0x06),
    ("SENSOR", 0x07),
    ("SENSOR_SPARE", 0x08),
    ("USB", 0x09),
    ("USB_SPARE", 0x0A),
    ("VENT", 0x0B),
    ("VENT_SPARE", 0x0C),
    ("GPS", 0x0D),
    ("GPS_SPARE", 0x0E),
    ("FILL", 0x0F),
    ("FILL_SPARE", 0x10),
    ("ARMING", 0x11),
    ("ARMING_SPARE", 0x12),
    ("PAPA", 0x13),
    ("PAPA_SPARE", 0x14),
    ("ROCKET_PI", 0x15),
    ("ROCKET_PI_2", 0x16),
    ("ROCKET_PI_2_SPARE", 0x18),
    ("SENSOR_2", 0x19),
    ("SENSOR_2_SPARE", 0x1A),
    ("SENSOR_3", 0x1B),
    ("SENSOR_4", 0x1C),
    ("LOGGER_2", 0x1D),
    ("RLCS", 0x1E),
];

const GEN_CMDS: &[(&str, u64)] = &[("BUS_DOWN_WARNING", 0)];

const ACTUATOR_IDS: &[(&str, u64)] = &[
    ("VENT_VALVE", 0),
    ("INJECTOR_VALVE", 1),
    ("MAMA", 2),
    ("PICAM", 3),
    ("CANBUS", 4),
];

const ACTUATOR_STATES: &[(&str, u64)] = &[
    ("ACTUATOR_OPEN", 0),
    ("ACTUATOR_CLOSED", 1),
    ("ACTUATOR_UNK", 2),
    ("ACTUATOR_ILLEGAL", 3),
];

const ARM_STATES: &[(&str, u64)] = &[("DISARMED", 0), ("ARMED", 1)];

const BOARD_STATUS: &[(&str, u64)] = &[
    ("E_NOMINAL", 0),
    ("E_BUS_OVER_CURRENT", 1),
    ("E_BUS_UNDER_VOLTAGE", 2),
    ("E_BUS_OVER_VOLTAGE", 3),
    ("E_BATT_UNDER_VOLTAGE", 4),
    ("E_BATT_OVER_VOLTAGE", 5),
    ("E_BOARD_FEARED_DEAD", 6),
    ("E_NO_CAN_TRAFFIC", 7),
    ("E_MISSING_CRITICAL_BOARD", 8),
    ("E_RADIO_SIGNAL_LOST", 9),
    ("E_ACTUATOR_STATE", 10),
    ("E_CANNOT_INIT_DACS", 11),
    ("E_VENT_POT_RANGE", 12),
    ("E_LOGGING", 13),
    ("E_GPS", 14),
    ("E_SENSOR", 15),
    ("E_ILLEGAL_CAN_MSG", 16),
    ("E_SEGFAULT", 17),
    ("E_UNHANDLED_INTERRUPT", 18),
    ("E_CODING_ERROR", 19),
    ("E_BATT_OVER_CURRENT", 20),
];

const SENSOR_IDS: &[(&str, u64)] = &[
    ("SENSOR_IMU1", 0),
    ("SENSOR_IMU2", 1),
    ("SENSOR_BARO", 2),
    ("SENSOR_PRESSURE_OX", 3),
    ("SENSOR_PRESSURE_CC", 4),
    ("SENSOR_VENT_BATT", 5),
    ("SENSOR_INJ_BATT", 6),
    ("SENSOR_ARM_BATT_1", 7),
    ("SENSOR_ARM_BATT_2", 8),
    ("SENSOR_BATT_CURR", 9),
    ("SENSOR_BUS_CURR", 10),
    ("SENSOR_VELOCITY", 11),
    ("SENSOR_MAG_1", 12),
    ("SENSOR_MAG_2", 13),
    ("SENSOR_ROCKET_BATT", 14),
    ("SENSOR_PRESSURE_PNEUMATICS", 15),
    ("SENSOR_VENT_TEMP", 16),
    ("SENSOR_RADIO_CURR", 18),
];

const FILL_DIRECTIONS: &[(&str, u64)] = &[("FILLING", 0), ("EMPTYING", 1)];

fn table(name: &str, entries: &[(&str, u64)]) -> Result<Arc<EnumTable>, SchemaError> {
    EnumTable::new(name, entries).map(Arc::new)
}

fn time24() -> Field {
    Field::numeric("time", 24)
}

fn time16() -> Field {
    Field::numeric("time", 16)
}

fn three_axis() -> Schema {
    Schema::new(vec![
        time16(),
        Field::signed("x", 16),
        Field::signed("y", 16),
        Field::signed("z", 16),
    ])
}

fn gps_coordinate() -> Schema {
    Schema::new(vec![
        time24(),
        Field::numeric("degs", 8),
        Field::numeric("mins", 8),
        Field::numeric("dmins", 16),
        Field::ascii("direction", 8),
    ])
}

fn board_status(
    boards: &Arc<EnumTable>,
    sensors: &Arc<EnumTable>,
    states: &Arc<EnumTable>,
) -> Result<Schema, SchemaError> {
    let one = |name: &str, bits| Schema::new(vec![Field::numeric(name, bits)]);

    let variants = vec![
        ("E_BUS_OVER_CURRENT", one("current", 16)),
        ("E_BATT_OVER_CURRENT", one("current", 16)),
        ("E_BUS_UNDER_VOLTAGE", one("voltage", 16)),
        ("E_BUS_OVER_VOLTAGE", one("voltage", 16)),
        ("E_BATT_UNDER_VOLTAGE", one("voltage", 16)),
        ("E_BATT_OVER_VOLTAGE", one("voltage", 16)),
        (
            "E_BOARD_FEARED_DEAD",
            Schema::new(vec![Field::enumeration("board_id", 8, Arc::clone(boards))?]),
        ),
        (
            "E_MISSING_CRITICAL_BOARD",
            Schema::new(vec![Field::enumeration("board_id", 8, Arc::clone(boards))?]),
        ),
        ("E_NO_CAN_TRAFFIC", one("err_time", 16)),
        ("E_RADIO_SIGNAL_LOST", one("err_time", 16)),
        (
            "E_SENSOR",
            Schema::new(vec![Field::enumeration("sensor_id", 8, Arc::clone(sensors))?]),
        ),
        (
            "E_ACTUATOR_STATE",
            Schema::new(vec![
                Field::enumeration("req_state", 8, Arc::clone(states))?,
                Field::enumeration("cur_state", 8, Arc::clone(states))?,
            ]),
        ),
        (
            "E_VENT_POT_RANGE",
            Schema::new(vec![
                Field::numeric("upper_mv", 8),
                Field::numeric("lower_mv", 8),
                Field::numeric("pot_mv", 8),
            ]),
        ),
    ];

    Ok(Schema::new(vec![
        time24(),
        Field::switch("status", 8, table("status", BOARD_STATUS)?, variants)?,
    ]))
}

/// Registry for the flight hardware message set
pub fn default_registry() -> Result<SchemaRegistry, SchemaError> {
    let boards = table("board_id", BOARD_TYPES)?;
    let sensors = table("sensor_id", SENSOR_IDS)?;
    let states = table("actuator_state", ACTUATOR_STATES)?;
    let actuators = table("actuator_id", ACTUATOR_IDS)?;
    let arm = table("arm_state", ARM_STATES)?;

    let mut builder = SchemaRegistry::builder()
        .message(
            GENERAL_CMD,
            "GENERAL_CMD",
            Schema::new(vec![
                time24(),
                Field::enumeration("command", 8, table("command", GEN_CMDS)?)?,
            ]),
        )
        .message(
            ACTUATOR_CMD,
            "ACTUATOR_CMD",
            Schema::new(vec![
                time24(),
                Field::enumeration("actuator", 8, Arc::clone(&actuators))?,
                Field::enumeration("req_state", 8, Arc::clone(&states))?,
            ]),
        )
        .message(
            ALT_ARM_CMD,
            "ALT_ARM_CMD",
            Schema::new(vec![
                time24(),
                Field::enumeration("state", 4, Arc::clone(&arm))?,
                Field::numeric("altimeter", 4),
            ]),
        )
        .message(
            DEBUG_MSG,
            "DEBUG_MSG",
            Schema::new(vec![
                time24(),
                Field::numeric("level", 4),
                Field::numeric("line", 12),
                Field::ascii("data", 24),
            ]),
        )
        .message(
            DEBUG_PRINTF,
            "DEBUG_PRINTF",
            Schema::new(vec![Field::ascii("string", 64)]),
        )
        .message(
            ALT_ARM_STATUS,
            "ALT_ARM_STATUS",
            Schema::new(vec![
                time24(),
                Field::enumeration("state", 4, arm)?,
                Field::numeric("altimeter", 4),
                Field::numeric("drogue_v", 16),
                Field::numeric("main_v", 16),
            ]),
        )
        .message(
            ACTUATOR_STATUS,
            "ACTUATOR_STATUS",
            Schema::new(vec![
                time24(),
                Field::enumeration("actuator", 8, actuators)?,
                Field::enumeration("cur_state", 8, Arc::clone(&states))?,
                Field::enumeration("req_state", 8, Arc::clone(&states))?,
            ]),
        )
        .message(
            GENERAL_BOARD_STATUS,
            "GENERAL_BOARD_STATUS",
            board_status(&boards, &sensors, &states)?,
        )
        .message(
            SENSOR_TEMP,
            "SENSOR_TEMP",
            Schema::new(vec![
                time24(),
                Field::numeric("sensor_id", 8),
                Field::scaled("temperature", 24, true, Scale::new(1, 1024)),
            ]),
        )
        .message(
            SENSOR_ALTITUDE,
            "SENSOR_ALTITUDE",
            Schema::new(vec![time24(), Field::signed("altitude", 32)]),
        )
        .message(SENSOR_ACC, "SENSOR_ACC", three_axis())
        .message(SENSOR_ACC2, "SENSOR_ACC2", three_axis())
        .message(SENSOR_GYRO, "SENSOR_GYRO", three_axis())
        .message(SENSOR_MAG, "SENSOR_MAG", three_axis())
        .message(
            SENSOR_ANALOG,
            "SENSOR_ANALOG",
            Schema::new(vec![
                time16(),
                Field::enumeration("sensor_id", 8, sensors)?,
                Field::numeric("value", 16),
            ]),
        )
        .message(
            GPS_TIMESTAMP,
            "GPS_TIMESTAMP",
            Schema::new(vec![
                time24(),
                Field::numeric("hrs", 8),
                Field::numeric("mins", 8),
                Field::numeric("secs", 8),
                Field::numeric("dsecs", 8),
            ]),
        )
        .message(GPS_LATITUDE, "GPS_LATITUDE", gps_coordinate())
        .message(GPS_LONGITUDE, "GPS_LONGITUDE", gps_coordinate())
        .message(
            GPS_ALTITUDE,
            "GPS_ALTITUDE",
            Schema::new(vec![
                time24(),
                Field::numeric("altitude", 16),
                Field::numeric("daltitude", 8),
                Field::ascii("unit", 8),
            ]),
        )
        .message(
            GPS_INFO,
            "GPS_INFO",
            Schema::new(vec![
                time24(),
                Field::numeric("num_sats", 8),
                Field::numeric("quality", 8),
            ]),
        )
        .message(
            FILL_LVL,
            "FILL_LVL",
            Schema::new(vec![
                time24(),
                Field::numeric("level", 8),
                Field::enumeration("direction", 8, table("direction", FILL_DIRECTIONS)?)?,
            ]),
        )
        .message(LEDS_ON, "LEDS_ON", Schema::default())
        .message(LEDS_OFF, "LEDS_OFF", Schema::default());

    for &(name, id) in BOARD_TYPES {
        builder = builder.board_type(id as u8, name);
    }
    builder.build()
}
