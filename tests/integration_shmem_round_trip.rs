//! Scenario 6 from spec section 8: a System-V shared-memory channel, with
//! one poller child per end, torn down when its owning channel closes.

use anyhow::Context;
use mini_ipc::{create_client, create_server, ArgType, ArgValue, Descriptor, ReturnValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn shm_name(nonce: u32) -> String {
    let key = 0x4d49_0000u32 | ((std::process::id() ^ nonce) & 0xffff);
    format!("shm:{key}")
}

#[test]
fn memory_transport_add_and_single_poller_per_end() -> anyhow::Result<()> {
    let name = shm_name(1);

    let mut server = create_server(&name, 0).with_context(|| format!("binding server '{name}'"))?;
    let descriptor = Descriptor::new("add", ArgType::Int, vec![ArgType::Int, ArgType::Int]).unwrap();
    server
        .export(
            descriptor.clone(),
            Box::new(|_d, args| Ok(ReturnValue::Int(args[0] as i32 + args[1] as i32))),
        )
        .context("exporting 'add'")?;

    let mut client = create_client(&name, 0).with_context(|| format!("connecting client '{name}'"))?;

    // Each end forks exactly one poller child.
    let pollers = mini_ipc::registry::active_poller_pids();
    assert!(pollers.len() >= 2, "expected a poller per end, got {pollers:?}");

    let stop = Arc::new(AtomicBool::new(false));
    let server_thread = {
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let _ = server.server_action(25);
            }
            server
        })
    };

    let reply = client
        .call(1000, &descriptor, &[ArgValue::Int(2), ArgValue::Int(3)])
        .context("calling 'add'")?;
    assert!(matches!(reply, ReturnValue::Int(5)));

    stop.store(true, Ordering::Relaxed);
    let server = server_thread.join().unwrap();

    drop(client);
    drop(server);

    // Give the reaped poller children a moment to be removed from the
    // registry by each channel's Drop before asserting.
    thread::sleep(std::time::Duration::from_millis(50));
    let remaining = mini_ipc::registry::active_poller_pids();
    for pid in pollers {
        assert!(!remaining.contains(&pid), "poller {pid} should have terminated");
    }
    Ok(())
}
