use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use chip8_vm::state::Key;
use log::error;
use rdev::{EventType, listen};

pub enum HostEvent {
    Press(Key),
    Release(Key),
    Quit,
}

/// Left-hand block of a QWERTY keyboard mapped onto the hex keypad:
///
/// ```text
/// 1 2 3 4        1 2 3 C
/// Q W E R   ->   4 5 6 D
/// A S D F        7 8 9 E
/// Z X C V        A 0 B F
/// ```
pub fn map_key(key: rdev::Key) -> Option<Key> {
    use rdev::Key as K;

    let mapped = match key {
        K::Num1 => Key::Key1,
        K::Num2 => Key::Key2,
        K::Num3 => Key::Key3,
        K::Num4 => Key::KeyC,
        K::KeyQ => Key::Key4,
        K::KeyW => Key::Key5,
        K::KeyE => Key::Key6,
        K::KeyR => Key::KeyD,
        K::KeyA => Key::Key7,
        K::KeyS => Key::Key8,
        K::KeyD => Key::Key9,
        K::KeyF => Key::KeyE,
        K::KeyZ => Key::KeyA,
        K::KeyX => Key::Key0,
        K::KeyC => Key::KeyB,
        K::KeyV => Key::KeyF,
        _ => return None,
    };
    Some(mapped)
}

fn translate(event_type: EventType) -> Option<HostEvent> {
    match event_type {
        EventType::KeyPress(rdev::Key::Escape) => Some(HostEvent::Quit),
        EventType::KeyPress(key) => map_key(key).map(HostEvent::Press),
        EventType::KeyRelease(key) => map_key(key).map(HostEvent::Release),
        _ => None,
    }
}

/// Starts listening to the physical keyboard on a background thread. Terminals
/// only report key presses, so press and release events come from the OS
/// instead. The machine is never touched from that thread.
pub fn spawn_listener() -> Receiver<HostEvent> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || listen_forever(sender));
    receiver
}

fn listen_forever(sender: Sender<HostEvent>) {
    let result = listen(move |event| {
        if let Some(host_event) = translate(event.event_type) {
            // The receiver is gone once the emulator has shut down.
            let _ = sender.send(host_event);
        }
    });
    if let Err(e) = result {
        error!("Keyboard listener stopped: {:?}", e);
    }
}
