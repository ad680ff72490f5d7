use embassy_futures::join::join;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal::digital::PinState;

use mcp23s17_driver::sim::{BusEvent, SimChipSelect, SimBus, SimDelay, Simulator};
use mcp23s17_driver::{Mcp23s17, Mcp23s17Device, RegisterAddress};
use shared_expander::{Guarded, LockPolicy, SharedExpander};

type SimExpander = SharedExpander<NoopRawMutex, Mcp23s17<SimBus, SimChipSelect, SimDelay>>;

fn shared(sim: &Simulator, policy: LockPolicy) -> SimExpander {
    let mcp = Mcp23s17Device::default()
        .begin(&mut sim.host(), sim.delay())
        .unwrap();
    SharedExpander::new(mcp, policy)
}

// Every select must be followed by its deselect before the next select
fn assert_strictly_framed(sim: &Simulator) {
    let mut selected = false;
    for event in sim.events() {
        match event {
            BusEvent::Select => {
                assert!(!selected, "chip selected twice");
                selected = true;
            }
            BusEvent::Deselect => selected = false,
            BusEvent::Write(_) | BusEvent::Read(_) | BusEvent::Transfer { .. } => {
                assert!(selected, "bytes clocked while deselected")
            }
            BusEvent::Configured(_) | BusEvent::Delay { .. } => {}
        }
    }
    assert!(!selected);
}

#[async_std::test]
async fn clients_never_interleave_on_the_bus() {
    let sim = Simulator::new();
    let expander = shared(&sim, LockPolicy::new(1_000));
    let mut writer = expander.client(sim.timer());
    let mut reader = expander.client(sim.timer());

    let reads = async {
        for _ in 0..20 {
            let value = reader.read_register(RegisterAddress::GPIOB).await.unwrap();
            assert!(matches!(value, Guarded::Completed(_)));
        }
    };
    let writes = async {
        for value in 0..20u8 {
            let outcome = writer.write_register(RegisterAddress::OLATA, value).await.unwrap();
            assert_eq!(outcome, Guarded::Completed(()));
        }
    };
    join(reads, writes).await;

    assert_eq!(sim.frames(), 40);
    assert_eq!(sim.overlaps(), 0);
    assert_eq!(sim.unframed(), 0);
    assert_eq!(sim.chip_select(), Some(PinState::High));
    assert_strictly_framed(&sim);
    assert_eq!(sim.register(RegisterAddress::OLATA), 19);
    assert_eq!(expander.skipped_count(), 0);
}

#[async_std::test]
async fn short_timeouts_skip_and_are_counted() {
    let sim = Simulator::new();
    let expander = shared(&sim, LockPolicy::new(2));
    let mut writer = expander.client(sim.timer());
    let mut reader = expander.client(sim.timer());

    // Reads hold the lock for more than 10 ms each
    let reads = async {
        let mut skipped = 0;
        for _ in 0..10 {
            if reader.read_register(RegisterAddress::GPIOA).await.unwrap().is_skipped() {
                skipped += 1;
            }
        }
        skipped
    };
    let writes = async {
        let mut skipped = 0;
        for value in 0..10u8 {
            if writer
                .write_register(RegisterAddress::OLATB, value)
                .await
                .unwrap()
                .is_skipped()
            {
                skipped += 1;
            }
        }
        skipped
    };
    let (read_skips, write_skips) = join(reads, writes).await;
    let skipped = read_skips + write_skips;

    assert!(write_skips > 0);
    assert_eq!(expander.skipped_count(), skipped);
    assert_eq!(sim.frames(), 20 - skipped as usize);
    assert_eq!(sim.overlaps(), 0);
    assert_strictly_framed(&sim);
}

#[async_std::test]
async fn retries_outlast_a_busy_peer() {
    let sim = Simulator::new();
    let expander = shared(&sim, LockPolicy::new(2).with_retries(30));
    let mut writer = expander.client(sim.timer());
    let mut reader = expander.client(sim.timer());

    let reads = async {
        for _ in 0..2 {
            let value = reader.read_register(RegisterAddress::GPIOA).await.unwrap();
            assert!(!value.is_skipped());
        }
    };
    let writes = async {
        let outcome = writer.write_register(RegisterAddress::OLATA, 0x5A).await.unwrap();
        assert_eq!(outcome, Guarded::Completed(()));
    };
    join(reads, writes).await;

    assert_eq!(expander.skipped_count(), 0);
    assert_eq!(sim.register(RegisterAddress::OLATA), 0x5A);
    assert_eq!(sim.frames(), 3);
}

#[async_std::test]
async fn exclusive_access_keeps_a_sequence_together() {
    let sim = Simulator::new();
    let expander = shared(&sim, LockPolicy::new(2));
    let mut other = expander.client(sim.timer());

    {
        let mut mcp = expander.exclusive().await;
        mcp.write_register(RegisterAddress::IODIRA, 0x00).await.unwrap();

        // Lock is held, the other client gives up
        let outcome = other.write_register(RegisterAddress::OLATA, 0xFF).await.unwrap();
        assert_eq!(outcome, Guarded::Skipped);

        mcp.write_register(RegisterAddress::OLATA, 0xAA).await.unwrap();
    }

    assert_eq!(expander.skipped_count(), 1);
    assert_eq!(sim.register(RegisterAddress::GPIOA), 0xAA);
    assert_eq!(
        other.read_register(RegisterAddress::OLATA).await.unwrap(),
        Guarded::Completed(0xAA)
    );
}
