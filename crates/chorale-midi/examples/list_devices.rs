use chorale_midi::{MidiBackend, MidirBackend};

fn main() -> chorale_midi::Result<()> {
    let backend = MidirBackend::default();

    println!("=== MIDI Input Devices ===");
    let inputs = backend.inputs()?;
    if inputs.is_empty() {
        println!("  (none found)");
    }
    for (i, dev) in inputs.iter().enumerate() {
        println!("  [{}] {}", i, dev.display_name);
    }

    println!("\n=== MIDI Output Devices ===");
    let outputs = backend.outputs()?;
    if outputs.is_empty() {
        println!("  (none found)");
    }
    for (i, dev) in outputs.iter().enumerate() {
        println!("  [{}] {}", i, dev.display_name);
    }
    Ok(())
}
