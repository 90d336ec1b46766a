//! Mapping received CC reports onto the ValueDB.
//!
//! Each report contributes values and their schema. Property names are
//! always the raw tuple key; user-facing labels (including the
//! SwitchType-derived direction labels of Multilevel Switch) live in
//! metadata only.

use zwave_cc::cc::{
    BasicCC, BinarySwitchCC, ManufacturerSpecificCC, MultilevelSwitchCC, SwitchType, WakeUpCC,
    CC,
};
use zwave_cc::CommandClasses;

use crate::value_db::{Value, ValueDB, ValueEvent, ValueId, ValueKind, ValueMetadata};

/// Value id for a CC property on a node/endpoint.
fn value_id(node_id: u8, endpoint: u8, cc: CommandClasses, property: &str) -> ValueId {
    ValueId::new(node_id, endpoint, cc.as_u8(), property)
}

/// Apply a decoded report to the store. Returns the change events the
/// application should see.
pub fn apply_report(
    db: &mut ValueDB,
    node_id: u8,
    endpoint: u8,
    cc: &CC,
) -> Vec<ValueEvent> {
    let mut events = Vec::new();
    match cc {
        CC::Basic(BasicCC::Report {
            current_value,
            target_value,
            ..
        }) => {
            let id = value_id(node_id, endpoint, CommandClasses::Basic, "currentValue");
            push_meta(
                db,
                &mut events,
                id.clone(),
                ValueMetadata::readwrite(ValueKind::Number).with_range(0, 99),
            );
            if let Some(value) = current_value {
                push(db, &mut events, id, Value::Number(*value as i64));
            }
            if let Some(target) = target_value {
                let id = value_id(node_id, endpoint, CommandClasses::Basic, "targetValue");
                push(db, &mut events, id, Value::Number(*target as i64));
            }
        }
        CC::BinarySwitch(BinarySwitchCC::Report {
            current_value,
            target_value,
            ..
        }) => {
            let id = value_id(node_id, endpoint, CommandClasses::BinarySwitch, "currentValue");
            push_meta(
                db,
                &mut events,
                id.clone(),
                ValueMetadata::readwrite(ValueKind::Boolean),
            );
            if let Some(value) = current_value {
                push(db, &mut events, id, Value::Boolean(*value));
            }
            if let Some(target) = target_value {
                let id = value_id(node_id, endpoint, CommandClasses::BinarySwitch, "targetValue");
                push(db, &mut events, id, Value::Boolean(*target));
            }
        }
        CC::MultilevelSwitch(MultilevelSwitchCC::Report {
            current_value,
            target_value,
            duration,
        }) => {
            let id = value_id(
                node_id,
                endpoint,
                CommandClasses::MultilevelSwitch,
                "currentValue",
            );
            push_meta(
                db,
                &mut events,
                id.clone(),
                ValueMetadata::readwrite(ValueKind::Number).with_range(0, 99),
            );
            if let Some(value) = current_value {
                push(db, &mut events, id, Value::Number(*value as i64));
            }
            if let Some(target) = target_value {
                let id = value_id(
                    node_id,
                    endpoint,
                    CommandClasses::MultilevelSwitch,
                    "targetValue",
                );
                push(db, &mut events, id, Value::Number(*target as i64));
            }
            if let Some(duration) = duration {
                let id = value_id(
                    node_id,
                    endpoint,
                    CommandClasses::MultilevelSwitch,
                    "duration",
                );
                push_meta(
                    db,
                    &mut events,
                    id.clone(),
                    ValueMetadata::readonly(ValueKind::Duration).volatile(),
                );
                push(db, &mut events, id, Value::Duration(duration.as_u8()));
            }
        }
        CC::MultilevelSwitch(MultilevelSwitchCC::SupportedReport { primary, .. }) => {
            apply_switch_type_metadata(db, &mut events, node_id, endpoint, *primary);
        }
        CC::ManufacturerSpecific(ManufacturerSpecificCC::Report {
            manufacturer_id,
            product_type,
            product_id,
        }) => {
            for (property, raw) in [
                ("manufacturerId", *manufacturer_id),
                ("productType", *product_type),
                ("productId", *product_id),
            ] {
                let id = value_id(
                    node_id,
                    endpoint,
                    CommandClasses::ManufacturerSpecific,
                    property,
                );
                push_meta(
                    db,
                    &mut events,
                    id.clone(),
                    ValueMetadata::readonly(ValueKind::Number),
                );
                push(db, &mut events, id, Value::Number(raw as i64));
            }
        }
        CC::WakeUp(WakeUpCC::IntervalReport { seconds, .. }) => {
            let id = value_id(node_id, endpoint, CommandClasses::WakeUp, "wakeUpInterval");
            push_meta(
                db,
                &mut events,
                id.clone(),
                ValueMetadata::readwrite(ValueKind::Number),
            );
            push(db, &mut events, id, Value::Number(*seconds as i64));
        }
        _ => {}
    }
    events
}

/// The direction value pair of Multilevel Switch carries runtime-derived
/// labels ("Up"/"Down" vs "Open"/"Close"); the keys stay raw.
fn apply_switch_type_metadata(
    db: &mut ValueDB,
    events: &mut Vec<ValueEvent>,
    node_id: u8,
    endpoint: u8,
    switch_type: SwitchType,
) {
    let (down_label, up_label) = switch_type.direction_labels();
    let up = value_id(node_id, endpoint, CommandClasses::MultilevelSwitch, "level")
        .with_key("up");
    let down = value_id(node_id, endpoint, CommandClasses::MultilevelSwitch, "level")
        .with_key("down");
    push_meta(
        db,
        events,
        up,
        ValueMetadata::readwrite(ValueKind::Boolean)
            .with_label(up_label)
            .volatile(),
    );
    push_meta(
        db,
        events,
        down,
        ValueMetadata::readwrite(ValueKind::Boolean)
            .with_label(down_label)
            .volatile(),
    );
}

fn push(db: &mut ValueDB, events: &mut Vec<ValueEvent>, id: ValueId, value: Value) {
    if let Some(event) = db.set(id, value) {
        events.push(event);
    }
}

fn push_meta(db: &mut ValueDB, events: &mut Vec<ValueEvent>, id: ValueId, meta: ValueMetadata) {
    if let Some(event) = db.set_metadata(id, meta) {
        events.push(event);
    }
}

/// Apply an optimistic or confirmed write of a target value to the
/// current value.
pub fn apply_confirmed_set(
    db: &mut ValueDB,
    node_id: u8,
    endpoint: u8,
    cc: &CC,
) -> Vec<ValueEvent> {
    let mut events = Vec::new();
    match cc {
        CC::BinarySwitch(BinarySwitchCC::Set { target_value, .. }) => {
            let id = value_id(node_id, endpoint, CommandClasses::BinarySwitch, "currentValue");
            push(db, &mut events, id, Value::Boolean(*target_value));
        }
        CC::MultilevelSwitch(MultilevelSwitchCC::Set { target_value, .. }) => {
            let id = value_id(
                node_id,
                endpoint,
                CommandClasses::MultilevelSwitch,
                "currentValue",
            );
            push(db, &mut events, id, Value::Number(*target_value as i64));
        }
        CC::Basic(BasicCC::Set { target_value }) => {
            let id = value_id(node_id, endpoint, CommandClasses::Basic, "currentValue");
            push(db, &mut events, id, Value::Number(*target_value as i64));
        }
        _ => {}
    }
    events
}
