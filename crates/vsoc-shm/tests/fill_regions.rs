//! Two-region fill exchange: each side writes its buffers, interrupts the
//! peer, and observes the peer's writes after being woken.

use std::sync::atomic::{AtomicU32, Ordering};

use vsoc_shm::{RegionLayout, RegionSignals, RegionView, Sides};
use vsoc_testkit::{standard_world, FillRecord, PrimaryFillLayout, SecondaryFillLayout};

const HOST_PATTERN: &[u8] = b"host-pattern-abc";
const GUEST_PATTERN: &[u8] = b"guest-pattern-xy";

/// Field access shared by the two fill layouts.
trait FillAccess {
    fn host_status(&self) -> &AtomicU32;
    fn guest_status(&self) -> &AtomicU32;
    fn records(&self) -> &[FillRecord];
}

macro_rules! fill_access {
    ($layout:ty) => {
        impl FillAccess for $layout {
            fn host_status(&self) -> &AtomicU32 {
                &self.host_status
            }
            fn guest_status(&self) -> &AtomicU32 {
                &self.guest_status
            }
            fn records(&self) -> &[FillRecord] {
                &self.records
            }
        }
    };
}

fill_access!(PrimaryFillLayout);
fill_access!(SecondaryFillLayout);

fn exchange<L>(host: &RegionView<L>, guest: &RegionView<L>)
where
    L: RegionLayout + FillAccess,
{
    std::thread::scope(|scope| {
        scope.spawn(|| {
            let layout = guest.layout();
            while layout.host_status().load(Ordering::Acquire) == 0 {
                guest.wait_for_signal(layout.host_status(), 0);
            }
            for record in layout.records() {
                let seen = FillRecord::read(&record.host_writable);
                assert_eq!(&seen[..], HOST_PATTERN);
                FillRecord::write(&record.guest_writable, GUEST_PATTERN);
            }
            layout.guest_status().store(1, Ordering::Release);
            guest.send_signal(Sides::Peer, layout.guest_status());
        });

        let layout = host.layout();
        for record in layout.records() {
            FillRecord::write(&record.host_writable, HOST_PATTERN);
        }
        layout.host_status().store(1, Ordering::Release);
        host.send_signal(Sides::Peer, layout.host_status());

        while layout.guest_status().load(Ordering::Acquire) == 0 {
            host.wait_for_signal(layout.guest_status(), 0);
        }
        for record in layout.records() {
            let seen = FillRecord::read(&record.guest_writable);
            assert_eq!(&seen[..], GUEST_PATTERN);
        }
    });
}

#[test]
fn primary_and_secondary_round_trip() {
    let world = standard_world();

    let (host_p, guest_p) = world.view_pair::<PrimaryFillLayout>();
    let (host_s, guest_s) = world.view_pair::<SecondaryFillLayout>();

    exchange(&host_p, &guest_p);
    exchange(&host_s, &guest_s);

    // Every delivered interrupt ends up drained on both sides of both
    // regions. A waiter can observe the peer's write before its own worker
    // has drained the interrupt, so give the workers a moment.
    assert!(drained(&host_p));
    assert!(drained(&guest_p));
    assert!(drained(&host_s));
    assert!(drained(&guest_s));
}

fn drained<L: RegionLayout>(view: &RegionView<L>) -> bool {
    for _ in 0..1000 {
        if !view.has_incoming_interrupt() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    false
}

#[test]
fn wait_returns_promptly_when_the_value_already_changed() {
    let world = standard_world();
    let (host, guest) = world.view_pair::<PrimaryFillLayout>();

    // Peer writes a non-expected value first, then signals.
    guest.layout().host_status.store(7, Ordering::Release);
    guest.send_signal(Sides::Peer, guest.layout().host_status());

    // Waiting for "still 0" must not block.
    host.wait_for_signal(host.layout().host_status(), 0);
    assert_eq!(host.layout().host_status.load(Ordering::Acquire), 7);
}
