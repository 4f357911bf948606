//! Generate a scripted session's telemetry as NDJSON, suitable for
//! `invigil process --input -`

use invigil::types::{SignalType, SignalValue, TelemetryEvent};

fn main() {
    let mut events: Vec<TelemetryEvent> = Vec::new();

    // One sample per second per camera signal, with scripted anomalies:
    // a sustained look away (8s-12s) and a second face (24s-26s)
    for t in 0..30 {
        let t = t as f64;
        let yaw = if (8.0..=12.0).contains(&t) { 41.0 } else { 4.0 };
        let faces = if (24.0..=26.0).contains(&t) { 2.0 } else { 1.0 };
        events.push(event(SignalType::HeadYaw, t, yaw));
        events.push(event(SignalType::FaceCount, t, faces));
        events.push(event(SignalType::FacePresence, t, true));
    }

    // A brief phone sighting at 20s, too short to confirm
    events.push(event(SignalType::PhoneConfidence, 20.0, 0.8));
    events.push(event(SignalType::PhoneConfidence, 20.4, 0.1));

    events.sort_by(|a, b| a.session_time.total_cmp(&b.session_time));

    for event in &events {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Error: {e:?}"),
        }
    }
}

fn event(signal_type: SignalType, t: f64, value: impl Into<SignalValue>) -> TelemetryEvent {
    TelemetryEvent::new("demo-session", signal_type, t, value)
}
