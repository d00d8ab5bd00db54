use serde_json::Value;

const WEEKDAYS: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

/// Add a rendered `time` (`HH:MM`) next to every open/close hour+minute
/// pair in an item's weekly timetable. Original subfields are left intact;
/// items without a timetable come back unchanged.
pub fn normalize_work_hours(mut item: Value) -> Value {
    let Some(timetable) = item
        .get_mut("work_hours")
        .and_then(|hours| hours.get_mut("timetable"))
        .and_then(Value::as_object_mut)
    else {
        return item;
    };

    for day in WEEKDAYS {
        let Some(slots) = timetable.get_mut(day).and_then(Value::as_array_mut) else {
            continue;
        };
        for slot in slots.iter_mut() {
            for edge in ["open", "close"] {
                if let Some(point) = slot.get_mut(edge) {
                    render_time(point);
                }
            }
        }
    }
    item
}

fn render_time(point: &mut Value) {
    let (Some(hour), Some(minute)) = (
        point.get("hour").and_then(Value::as_u64),
        point.get("minute").and_then(Value::as_u64),
    ) else {
        return;
    };
    if let Some(map) = point.as_object_mut() {
        map.insert("time".to_string(), Value::String(format!("{hour:02}:{minute:02}")));
    }
}
