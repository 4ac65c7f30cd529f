mod common;

use common::*;
use embedded_hal_mock::delay::MockNoop;
use embedded_hal_mock::pin::{Mock as PinMock, Transaction as PinTransaction, State as PinState};
use stpm3x_metro::decode::FACTOR_SCALE;
use stpm3x_metro::energy::FULL_SCALE;
use stpm3x_metro::*;

const EXT2: DeviceId = DeviceId::ext(2);

/// Two STPM34, channel 1 on the first one and channel 2 on the second one.
fn two_chips() -> (Metro<2>, [FakeChip; 2]) {
    let (mut metro, chips) = metrology([DeviceKind::Stpm34, DeviceKind::Stpm34]);
    metro.setup_channels(0x0000_1211).unwrap();
    (metro, chips)
}

fn pulse() -> [PinTransaction; 2] {
    [PinTransaction::set(PinState::Low), PinTransaction::set(PinState::High)]
}

#[test]
fn scaled_voltage_sample() {
    let (mut metro, chips) = two_chips();
    metro.set_hardware_factors(Channel::Ch1, Factors { voltage: 1000, ..Default::default() }).unwrap();
    chips[0].set(Register::DspReg2.addr(), 220_000);
    chips[0].set(Register::DspReg3.addr(), 0x00FF_FFFF);
    assert_eq!(metro.read_instantaneous(Channel::Ch1, Band::Wide, Mode::Raw).unwrap(), (220_000, -1));
    assert_eq!(metro.read_instantaneous(Channel::Ch1, Band::Wide, Mode::Scaled).unwrap(), (220, 0));
}

#[test]
fn rms_raw_and_scaled() {
    let (mut metro, chips) = two_chips();
    metro.set_hardware_factors(Channel::Ch2, Factors { voltage: 10_000, current: 500, ..Default::default() }).unwrap();
    // 22000 in the voltage field, 3000 in the current field
    chips[1].set(Register::DspReg14.addr(), (3000 << 15) | 22_000);
    assert_eq!(metro.read_rms(Channel::Ch2, Mode::Raw).unwrap(), (22_000, 3000));
    assert_eq!(metro.read_rms(Channel::Ch2, Mode::Scaled).unwrap(), (220, 2));
    // Channel 1 lives on the other chip
    assert_eq!(metro.read_rms(Channel::Ch1, Mode::Raw).unwrap(), (0, 0));
}

#[test]
fn unmapped_channel() {
    let (mut metro, chips) = two_chips();
    assert!(matches!(metro.read_power(Channel::Ch3, PowerKind::Active), Err(Error::UnmappedChannel)));
    assert!(matches!(metro.read_energy(Channel::Ch4, EnergyKind::Active), Err(Error::UnmappedChannel)));
    assert!(chips[0].writes().is_empty());
}

#[test]
fn powers_read_their_own_rows() {
    let (mut metro, chips) = two_chips();
    metro.set_hardware_factors(Channel::Ch1, Factors { power: FACTOR_SCALE, ..Default::default() }).unwrap();
    let base = Register::Ph1Reg1.addr();
    for (i, _) in PowerKind::ALL.iter().enumerate() {
        chips[0].set(base + 2 * (4 + i as u8), 100 + i as u32);
    }
    for (i, kind) in PowerKind::ALL.iter().enumerate() {
        assert_eq!(metro.read_power(Channel::Ch1, *kind).unwrap(), 100 + i as i32);
    }
    // 29-bit field, bits above are not part of it
    chips[0].set(base + 8, 0xF000_0000 | 0x1FFF_FFFE);
    assert_eq!(metro.read_power(Channel::Ch1, PowerKind::Active).unwrap(), -2);
}

#[test]
fn energy_wraps_across_reads() {
    let (mut metro, chips) = two_chips();
    metro.set_hardware_factors(Channel::Ch1, Factors { energy: FACTOR_SCALE, ..Default::default() }).unwrap();
    let addr = Register::Ph1Reg1.addr();
    let values: Vec<i64> = [100, 250, 50, 300].iter().map(|primary| {
        chips[0].set(addr, *primary);
        metro.read_energy(Channel::Ch1, EnergyKind::Active).unwrap()
    }).collect();
    assert_eq!(values, vec![100, 250, 50 + FULL_SCALE as i64, 300 + FULL_SCALE as i64]);
    assert_eq!(
        metro.energy().value(Channel::Ch1, EnergyKind::Active),
        EnergyValue { primary: 300, extension: 1 }
    );

    // Other kinds and channels are untouched
    assert_eq!(metro.energy().combined_value(Channel::Ch1, EnergyKind::Reactive), 0);
    assert_eq!(metro.energy().combined_value(Channel::Ch2, EnergyKind::Active), 0);

    metro.reset_energy(Scope::One(Channel::Ch1));
    assert_eq!(metro.energy().combined_value(Channel::Ch1, EnergyKind::Active), 0);
}

#[test]
fn period_and_phase() {
    let (mut metro, chips) = metrology([DeviceKind::Stpm34]);
    metro.setup_channels(0x0000_2111).unwrap();
    chips[0].set(Register::DspReg1.addr(), (2500 << 16) | 2000);
    chips[0].set(Register::DspReg17.addr(), 0x0123_0000);
    chips[0].set(Register::DspReg19.addr(), 0xF456_FFFF);
    assert_eq!(metro.read_period(Channel::Ch1).unwrap(), 2000);
    assert_eq!(metro.read_period(Channel::Ch2).unwrap(), 2500);
    assert_eq!(metro.read_phi(Channel::Ch1).unwrap(), 0x123);
    assert_eq!(metro.read_phi(Channel::Ch2).unwrap(), 0x456);
    assert_eq!(decode::frequency_millihertz(2500), Some(50_000));
}

#[test]
fn link_break_keeps_snapshot() {
    let (mut metro, chips) = two_chips();
    let addr = Register::DspReg14.addr();
    chips[0].set(addr, 22_000);
    metro.read_rms(Channel::Ch1, Mode::Raw).unwrap();

    chips[0].set(addr, 11_000);
    chips[0].fail_next_receive(LinkError::Break);
    assert!(matches!(metro.read_rms(Channel::Ch1, Mode::Raw), Err(Error::LinkError(LinkError::Break))));
    let device = metro.registry().device(DeviceId::EXT1).unwrap();
    assert_eq!(device.snapshot().word(addr), Some(22_000));
    assert_eq!(metro.link_state(DeviceId::EXT1).unwrap(), (BufferState::Idle, BufferState::Idle));
    assert!(metro.query_link_status(DeviceId::EXT1, Query::One(LinkStatus::UartBreak)).unwrap().contains(LinkStatus::UartBreak));

    // The next transfer goes through
    assert_eq!(metro.read_rms(Channel::Ch1, Mode::Raw).unwrap(), (11_000, 0));
}

#[test]
fn corrupted_response() {
    let (mut metro, chips) = two_chips();
    chips[1].corrupt_next_response();
    assert!(matches!(metro.read_phi(Channel::Ch2), Err(Error::FrameError(FrameError::CrcError))));
    assert!(!metro.query_link_status(EXT2, Query::One(LinkStatus::UartCrcError)).unwrap().is_empty());
    assert_eq!(metro.devices_with_link_status(Query::All).as_slice(), &[EXT2]);

    metro.acknowledge_link_status(EXT2).unwrap();
    assert!(metro.devices_with_link_status(Query::All).is_empty());
}

#[test]
fn latch_all_chips_at_once() {
    let (mut metro, chips) = two_chips();
    chips[0].stage(Register::DspReg14.addr(), 1000);
    chips[1].stage(Register::DspReg14.addr(), 2000);
    assert_eq!(metro.read_rms(Channel::Ch1, Mode::Raw).unwrap(), (0, 0));

    let epoch = metro.trigger_latch(Scope::All).unwrap();
    assert_ne!(epoch, 0);
    for chip in chips.iter() {
        assert_eq!(chip.state.borrow().latches, 1);
    }
    assert_eq!(metro.read_rms(Channel::Ch1, Mode::Raw).unwrap(), (1000, 0));
    assert_eq!(metro.read_rms(Channel::Ch2, Mode::Raw).unwrap(), (2000, 0));
    for id in [DeviceId::EXT1, EXT2] {
        assert_eq!(metro.latch().state(id), Ok(LatchState::Latched));
        assert_eq!(metro.registry().device(id).unwrap().snapshot().epoch(), Some(epoch));
    }

    let next = metro.trigger_latch(Scope::One(EXT2)).unwrap();
    assert_ne!(next, epoch);
    assert_eq!(metro.latch().epoch(DeviceId::EXT1), Ok(Some(epoch)));
    assert_eq!(metro.latch().epoch(EXT2), Ok(Some(next)));
}

#[test]
fn latch_timeout_reverts_to_idle() {
    let (mut metro, chips) = two_chips();
    chips[0].state.borrow_mut().latch_stuck = true;
    assert!(matches!(metro.trigger_latch(Scope::All), Err(Error::LatchTimeout)));
    for id in [DeviceId::EXT1, EXT2] {
        assert_eq!(metro.latch().state(id), Ok(LatchState::Idle));
        assert_eq!(metro.latch().epoch(id), Ok(None));
    }
    // Reads are allowed again, without an epoch
    metro.read_rms(Channel::Ch1, Mode::Raw).unwrap();
    assert_eq!(metro.registry().device(DeviceId::EXT1).unwrap().snapshot().epoch(), None);

    chips[0].state.borrow_mut().latch_stuck = false;
    let epoch = metro.trigger_latch(Scope::All).unwrap();
    assert_eq!(metro.latch().epoch(DeviceId::EXT1), Ok(Some(epoch)));
}

#[test]
fn syn_pulse_latch_is_shared() {
    let chips = [FakeChip::new(), FakeChip::new()];
    let syn = [PinMock::new(&pulse()), PinMock::new(&pulse())];
    let ports = [
        Port::new(chips[0].clone(), idle_pin(), syn[0].clone(), idle_pin()),
        Port::new(chips[1].clone(), idle_pin(), syn[1].clone(), idle_pin())
    ];
    let devices = [DeviceConfig { latch: LatchType::SynPulse, ..DeviceConfig::chip(DeviceKind::Stpm33) }; 2];
    let mut metro = Metrology::new(ports, devices, MockNoop::new());
    metro.init();
    metro.trigger_latch(Scope::All).unwrap();
    for mut pin in syn {
        pin.done();
    }
    assert!(chips[0].writes().is_empty());
    assert_eq!(metro.latch().state(EXT2), Ok(LatchState::Latched));
}

#[test]
fn auto_latch() {
    let (mut metro, chips) = two_chips();
    metro.set_latch_device_type(DeviceId::EXT1, LatchType::Auto).unwrap();
    assert_ne!(chips[0].get(Register::DspCr3.addr()) & (1 << 23), 0);
    assert!(metro.get_setup(DeviceId::EXT1).unwrap().auto_latch);

    let writes = chips[0].writes().len();
    metro.trigger_latch(Scope::One(DeviceId::EXT1)).unwrap();
    assert_eq!(chips[0].writes().len(), writes);
    assert_eq!(metro.latch().state(DeviceId::EXT1), Ok(LatchState::Latched));

    // Back to software latching clears the bit
    metro.set_latch_device_type(DeviceId::EXT1, LatchType::Software).unwrap();
    assert_eq!(chips[0].get(Register::DspCr3.addr()) & (1 << 23), 0);
}

#[test]
fn power_up_and_hardware_reset() {
    let chip = FakeChip::new();
    let cs = PinMock::new(&[
        // Power-up
        PinTransaction::set(PinState::High),
        // Reset
        PinTransaction::set(PinState::Low), PinTransaction::set(PinState::High)
    ]);
    let en = PinMock::new(&pulse());
    let syn_expectations: Vec<PinTransaction> = (0..RESET_SYN_PULSES).flat_map(|_| pulse()).collect();
    let syn = PinMock::new(&syn_expectations);
    let port = Port::new(chip.clone(), cs.clone(), syn.clone(), en.clone());
    let mut metro = Metrology::new([port], [DeviceConfig::chip(DeviceKind::Stpm32)], MockNoop::new());
    metro.init();

    metro.power_up_device().unwrap();
    metro.config_reset(ResetKind::SynPulse).unwrap();
    for mut pin in [cs, en, syn] {
        pin.done();
    }
    assert!(chip.writes().is_empty());
}

#[test]
fn software_reset() {
    let (mut metro, chips) = two_chips();
    metro.trigger_latch(Scope::All).unwrap();
    metro.config_reset(ResetKind::Software).unwrap();
    for chip in chips.iter() {
        assert_eq!(chip.state.borrow().resets, 1);
        assert_eq!(chip.get(Register::DspCr3.addr()) & (1 << 20), 0);
    }
    assert_eq!(metro.latch().state(DeviceId::EXT1), Ok(LatchState::Idle));
}

#[test]
fn setup_round_trip() {
    let (mut metro, chips) = two_chips();
    // Calibration bits outside the configuration fields
    chips[0].set(Register::DspCr1.addr(), 0x0000_0F0F);
    let config = ChipConfig {
        channels: [
            ChannelConfig {
                gain: CurrentGain::X16,
                vref: VoltageReference::Internal,
                led: LedConfig { enabled: true, channel: LedChannel::Secondary, power: LedPower::Reactive }
            },
            ChannelConfig {
                gain: CurrentGain::X4,
                vref: VoltageReference::External,
                led: LedConfig::default()
            }
        ],
        tamper: Tamper::Enabled(TamperTolerance::Percent6_25),
        pin_output: PinOutput::Zcr(ZcrSource::C2),
        auto_latch: false
    };
    metro.setup(DeviceId::EXT1, &config).unwrap();
    assert_eq!(metro.get_setup(DeviceId::EXT1).unwrap(), config);
    assert_eq!(chips[0].get(Register::DspCr1.addr()) & 0x0000_0F0F, 0x0000_0F0F);

    let update = ConfigUpdate { gain: [Some(CurrentGain::X8), None], ..Default::default() };
    metro.apply_config(DeviceId::EXT1, &update).unwrap();
    let mut expected = config;
    expected.channels[0].gain = CurrentGain::X8;
    assert_eq!(metro.get_setup(DeviceId::EXT1).unwrap(), expected);

    // Nothing to change, nothing written
    let writes = chips[0].writes().len();
    metro.apply_config(DeviceId::EXT1, &ConfigUpdate::default()).unwrap();
    assert_eq!(chips[0].writes().len(), writes);

    assert!(matches!(metro.setup(DeviceId::HOST, &config), Err(Error::InvalidDevice)));
}

#[test]
fn status_query_and_acknowledge() {
    let (mut metro, chips) = two_chips();
    let sr1 = Status::Refreshed.mask() | Status::VoltageSagDown.mask();
    chips[0].set(Register::DspSr1.addr(), sr1);
    chips[0].set(Register::DspEv1.addr(), LiveEvent::VoltageSag.mask());
    chips[0].set(Register::UsReg3.addr(), LinkStatus::UartCrcError.mask() | 0x0000_00FF);

    let status = metro.refresh_status(DeviceId::EXT1).unwrap();
    metro.refresh_status(EXT2).unwrap();
    assert!(status.status[0].contains(Status::VoltageSagDown));
    assert!(status.status[1].is_empty());
    assert!(status.events[0].contains(LiveEvent::VoltageSag));
    assert_eq!(status.link.bits(), LinkStatus::UartCrcError.mask());

    let query = Query::One(Status::VoltageSagDown);
    assert!(!metro.query_status(DeviceId::EXT1, InternalChannel::One, query).unwrap().is_empty());
    assert!(metro.query_status(DeviceId::EXT1, InternalChannel::Two, query).unwrap().is_empty());
    assert!(matches!(metro.query_status(DeviceId::EXT1, InternalChannel::None, query), Err(Error::UnmappedChannel)));
    assert_eq!(metro.devices_with_status(InternalChannel::One, query).as_slice(), &[DeviceId::EXT1]);
    assert_eq!(metro.devices_with_live_event(InternalChannel::One, Query::All).as_slice(), &[DeviceId::EXT1]);
    assert!(metro.devices_with_live_event(InternalChannel::Two, Query::All).is_empty());

    // Cleared on the chip by writing the pending bits back
    metro.acknowledge_status(DeviceId::EXT1, InternalChannel::One).unwrap();
    assert_eq!(chips[0].get(Register::DspSr1.addr()), 0);
    assert!(metro.devices_with_status(InternalChannel::One, Query::All).is_empty());

    // The interrupt masks in the lower half survive
    metro.acknowledge_link_status(DeviceId::EXT1).unwrap();
    assert_eq!(chips[0].get(Register::UsReg3.addr()), 0x0000_00FF);
    assert!(metro.query_link_status(DeviceId::EXT1, Query::All).unwrap().is_empty());
}

#[test]
fn blocks_and_data_rows() {
    let (mut metro, chips) = two_chips();
    metro.write_block_to_device(EXT2, Register::DfeCr1.addr(), &[1, 2, 3]).unwrap();
    assert_eq!(chips[1].writes(), vec![(Register::DfeCr1.addr(), vec![1, 2, 3])]);
    let mut buf = [0; 3];
    metro.read_block_from_device(EXT2, Register::DfeCr1.addr(), &mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3]);

    chips[0].set(Register::Ph2Reg1.addr(), 0xCAFE);
    metro.get_data_device(DeviceId::EXT1).unwrap();
    let snapshot = *metro.registry().device(DeviceId::EXT1).unwrap().snapshot();
    assert_eq!(snapshot.word(Register::Ph2Reg1.addr()), Some(0xCAFE));

    let mut buf = [0; 1];
    assert!(matches!(metro.read_block_from_device(DeviceId::HOST, 0x00, &mut buf), Err(Error::InvalidDevice)));
    assert!(matches!(metro.read_block_from_device(DeviceId::ext(3), 0x00, &mut buf), Err(Error::InvalidDevice)));
}

#[test]
fn channel_word() {
    let (mut metro, _) = two_chips();
    assert_eq!(metro.channels_word(), 0x0000_1211);
    assert!(matches!(metro.setup_channels(0x0000_1111), Err(Error::ChannelConflict)));
    assert_eq!(metro.channels_word(), 0x0000_1211);
}

#[test]
fn link_reset_keeps_energy() {
    let (mut metro, chips) = two_chips();
    metro.set_hardware_factors(Channel::Ch1, Factors { energy: FACTOR_SCALE, ..Default::default() }).unwrap();
    chips[0].set(Register::Ph1Reg1.addr(), 500);
    metro.read_energy(Channel::Ch1, EnergyKind::Active).unwrap();
    metro.reset_link(DeviceId::EXT1).unwrap();
    assert_eq!(metro.energy().combined_value(Channel::Ch1, EnergyKind::Active), 500);
    assert_eq!(metro.link_state(DeviceId::EXT1).unwrap(), (BufferState::Idle, BufferState::Idle));
    assert_eq!(metro.registry().resolve(Channel::Ch1), Ok((DeviceId::EXT1, InternalChannel::One)));
}

#[test]
fn software_reset_restarts_energy() {
    let (mut metro, chips) = two_chips();
    metro.set_hardware_factors(Channel::Ch1, Factors { energy: FACTOR_SCALE, ..Default::default() }).unwrap();
    let addr = Register::Ph1Reg1.addr();
    chips[0].set(addr, 1000);
    assert_eq!(metro.read_energy(Channel::Ch1, EnergyKind::Active).unwrap(), 1000);

    metro.config_reset(ResetKind::Software).unwrap();
    assert_eq!(chips[0].get(addr), 0);
    assert_eq!(metro.energy().value(Channel::Ch1, EnergyKind::Active), EnergyValue::default());

    // Counting again from zero is not a wraparound
    chips[0].set(addr, 10);
    assert_eq!(metro.read_energy(Channel::Ch1, EnergyKind::Active).unwrap(), 10);
    assert_eq!(metro.energy().value(Channel::Ch1, EnergyKind::Active).extension, 0);
}

#[test]
fn remapping_restarts_energy() {
    let (mut metro, chips) = two_chips();
    let unit = Factors { energy: FACTOR_SCALE, ..Default::default() };
    metro.set_hardware_factors(Channel::Ch1, unit).unwrap();
    metro.set_hardware_factors(Channel::Ch2, unit).unwrap();
    chips[0].set(Register::Ph1Reg1.addr(), 1000);
    chips[1].set(Register::Ph1Reg1.addr(), 10);
    assert_eq!(metro.read_energy(Channel::Ch1, EnergyKind::Active).unwrap(), 1000);
    assert_eq!(metro.read_energy(Channel::Ch2, EnergyKind::Active).unwrap(), 10);

    // Ch1 moves to the second chip, Ch2 is left unmapped
    metro.setup_channels(0x0000_0012).unwrap();
    assert_eq!(metro.read_energy(Channel::Ch1, EnergyKind::Active).unwrap(), 10);
    assert_eq!(metro.energy().combined_value(Channel::Ch2, EnergyKind::Active), 0);

    // Mapping another channel leaves Ch1 alone
    chips[0].set(Register::Ph2Reg1.addr(), 700);
    metro.map_channel(Channel::Ch2, DeviceId::EXT1, InternalChannel::Two).unwrap();
    metro.set_hardware_factors(Channel::Ch2, unit).unwrap();
    assert_eq!(metro.read_energy(Channel::Ch2, EnergyKind::Active).unwrap(), 700);
    assert_eq!(metro.energy().combined_value(Channel::Ch1, EnergyKind::Active), 10);

    // An STPM32 has no second channel
    metro.configure_device(DeviceId::EXT1, DeviceConfig::chip(DeviceKind::Stpm32)).unwrap();
    assert!(matches!(metro.read_energy(Channel::Ch2, EnergyKind::Active), Err(Error::UnmappedChannel)));
    assert_eq!(metro.energy().combined_value(Channel::Ch2, EnergyKind::Active), 0);
    assert_eq!(metro.energy().combined_value(Channel::Ch1, EnergyKind::Active), 10);
    assert_eq!(metro.channels_word(), 0x0000_0012);

    metro.unmap_channel(Channel::Ch1);
    assert_eq!(metro.energy().combined_value(Channel::Ch1, EnergyKind::Active), 0);
    assert_eq!(metro.channels_word(), 0);
}
