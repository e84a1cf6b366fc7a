// Copyright (c) Contributors to the vpfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::Reaper;

#[rstest]
fn test_counters_balance() {
    let reaper = Reaper::spawn();
    assert_eq!(reaper.in_flight(), 0);

    reaper.descent_started();
    reaper.descent_started();
    assert_eq!(reaper.in_flight(), 2);

    reaper.descent_ended();
    assert_eq!(reaper.in_flight(), 1);
    reaper.descent_ended();
    assert_eq!(reaper.in_flight(), 0);

    assert_eq!(reaper.totals(), (2, 2));
    reaper.shutdown();
}

#[rstest]
fn test_reap_request_with_no_children_is_absorbed() {
    let reaper = Reaper::spawn();
    reaper.request_reap();
    reaper.request_reap();
    // nothing to collect; the sweep must simply go back to sleep
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(reaper.in_flight(), 0);
    reaper.shutdown();
}

#[rstest]
#[serial_test::serial] // waits on this process's children
fn test_orphan_is_collected() {
    let reaper = Reaper::spawn();

    let child = std::process::Command::new("/bin/true")
        .spawn()
        .expect("spawn /bin/true");
    let pid = nix::unistd::Pid::from_raw(child.id() as i32);
    // deliberately never wait on the handle; the reaper owns it now
    drop(child);

    reaper.request_reap();

    // bounded quiesce: between the explicit request and the periodic
    // sweep the zombie must be gone shortly
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(3);
    loop {
        match nix::sys::wait::waitpid(pid, Some(nix::sys::wait::WaitPidFlag::WNOHANG)) {
            Err(nix::errno::Errno::ECHILD) => break, // collected
            _ if std::time::Instant::now() > deadline => {
                panic!("helper was never reaped");
            }
            _ => std::thread::sleep(std::time::Duration::from_millis(20)),
        }
    }
    reaper.shutdown();
}
