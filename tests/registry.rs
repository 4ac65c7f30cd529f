use stpm3x_metro::*;

fn registry() -> Registry<3> {
    Registry::new([
        DeviceConfig::chip(DeviceKind::Stpm34),
        DeviceConfig::chip(DeviceKind::Stpm32),
        DeviceConfig::default()
    ])
}

#[test]
fn unmapped_channels() {
    let registry = registry();
    for channel in Channel::ALL {
        assert_eq!(registry.resolve(channel), Err(RegistryError::UnmappedChannel));
    }
}

#[test]
fn map_and_resolve() {
    let mut registry = registry();
    registry.map(Channel::Ch1, DeviceId::EXT1, InternalChannel::One).unwrap();
    registry.map(Channel::Ch2, DeviceId::EXT1, InternalChannel::Two).unwrap();
    registry.map(Channel::Ch3, DeviceId::ext(2), InternalChannel::One).unwrap();
    for _ in 0..3 {
        assert_eq!(registry.resolve(Channel::Ch1), Ok((DeviceId::EXT1, InternalChannel::One)));
        assert_eq!(registry.resolve(Channel::Ch3), Ok((DeviceId::ext(2), InternalChannel::One)));
    }
    assert_eq!(registry.resolve(Channel::Ch4), Err(RegistryError::UnmappedChannel));
    assert_eq!(registry.device(DeviceId::EXT1).unwrap().channel_mask(), 0b0011);
    assert_eq!(registry.device(DeviceId::ext(2)).unwrap().channel_mask(), 0b0100);
}

#[test]
fn remapping_moves_the_channel() {
    let mut registry = registry();
    registry.map(Channel::Ch1, DeviceId::EXT1, InternalChannel::One).unwrap();
    registry.map(Channel::Ch1, DeviceId::ext(2), InternalChannel::One).unwrap();
    assert_eq!(registry.device(DeviceId::EXT1).unwrap().channel_mask(), 0);
    assert_eq!(registry.device(DeviceId::ext(2)).unwrap().channel_mask(), 0b0001);
    registry.unmap(Channel::Ch1);
    assert_eq!(registry.resolve(Channel::Ch1), Err(RegistryError::UnmappedChannel));
    assert_eq!(registry.device(DeviceId::ext(2)).unwrap().channel_mask(), 0);
}

#[test]
fn same_device_channel_twice() {
    let mut registry = registry();
    registry.map(Channel::Ch1, DeviceId::EXT1, InternalChannel::Two).unwrap();
    assert_eq!(
        registry.map(Channel::Ch2, DeviceId::EXT1, InternalChannel::Two),
        Err(RegistryError::ChannelConflict)
    );
    assert_eq!(registry.resolve(Channel::Ch2), Err(RegistryError::UnmappedChannel));
}

#[test]
fn invalid_devices() {
    let mut registry = registry();
    // Host, empty slot, out of range
    for id in [DeviceId::HOST, DeviceId::ext(3), DeviceId::ext(4)] {
        assert_eq!(registry.map(Channel::Ch1, id, InternalChannel::One), Err(RegistryError::InvalidDevice));
    }
    // The STPM32 has a single channel
    assert_eq!(
        registry.map(Channel::Ch1, DeviceId::ext(2), InternalChannel::Two),
        Err(RegistryError::InvalidDevice)
    );
    assert_eq!(
        registry.map(Channel::Ch1, DeviceId::EXT1, InternalChannel::None),
        Err(RegistryError::InvalidDevice)
    );
    assert_eq!(registry.configure(DeviceId::HOST, DeviceConfig::chip(DeviceKind::Stpm33)), Err(RegistryError::InvalidDevice));
}

#[test]
fn factors_follow_the_mapping() {
    let mut registry = registry();
    let factors = Factors { power: 1, energy: 2, voltage: 3, current: 4 };
    assert_eq!(registry.set_factors(Channel::Ch2, factors), Err(RegistryError::UnmappedChannel));

    registry.map(Channel::Ch2, DeviceId::EXT1, InternalChannel::Tamper).unwrap();
    registry.set_factors(Channel::Ch2, factors).unwrap();
    let device = registry.device(DeviceId::EXT1).unwrap();
    assert_eq!(device.factors(InternalChannel::Two), Some(&factors));
    assert_eq!(device.factors(InternalChannel::One), Some(&Factors::default()));
}

#[test]
fn mapping_word() {
    let mut registry = registry();
    registry.map(Channel::Ch1, DeviceId::EXT1, InternalChannel::One).unwrap();
    registry.map(Channel::Ch3, DeviceId::ext(2), InternalChannel::One).unwrap();
    registry.map(Channel::Ch4, DeviceId::EXT1, InternalChannel::Tamper).unwrap();
    let word = registry.channel_map().to_word();
    assert_eq!(word, 0x3112_0011);

    let mut other = self::registry();
    other.set_map(ChannelMap::from_word(word).unwrap()).unwrap();
    assert_eq!(other.channel_map(), registry.channel_map());
    assert_eq!(other.device(DeviceId::EXT1).unwrap().channel_mask(), 0b1001);
}

#[test]
fn rejected_mapping_keeps_the_previous_one() {
    let mut registry = registry();
    registry.map(Channel::Ch1, DeviceId::EXT1, InternalChannel::One).unwrap();
    let previous = *registry.channel_map();
    // Ch1 and Ch2 both on EXT1 channel 2
    let word = 0x0000_2121;
    assert_eq!(registry.set_map(ChannelMap::from_word(word).unwrap()), Err(RegistryError::ChannelConflict));
    assert_eq!(registry.channel_map(), &previous);
    assert_eq!(registry.device(DeviceId::EXT1).unwrap().channel_mask(), 0b0001);

    // Internal channel code 4 does not exist
    assert_eq!(ChannelMap::from_word(0x0000_0041), Err(RegistryError::InvalidDevice));
}

#[test]
fn latch_type() {
    let mut registry = registry();
    assert_eq!(registry.device(DeviceId::EXT1).unwrap().latch_type(), LatchType::Software);
    registry.set_latch_type(DeviceId::EXT1, LatchType::SynPulse).unwrap();
    assert_eq!(registry.device(DeviceId::EXT1).unwrap().latch_type(), LatchType::SynPulse);
    assert_eq!(registry.set_latch_type(DeviceId::ext(3), LatchType::Auto), Err(RegistryError::InvalidDevice));
}

#[test]
fn reconfigure_drops_missing_channels() {
    let mut registry = registry();
    registry.map(Channel::Ch1, DeviceId::EXT1, InternalChannel::Two).unwrap();
    registry.map(Channel::Ch2, DeviceId::EXT1, InternalChannel::One).unwrap();
    registry.map(Channel::Ch3, DeviceId::ext(2), InternalChannel::One).unwrap();

    // An STPM32 has no second channel
    registry.configure(DeviceId::EXT1, DeviceConfig::chip(DeviceKind::Stpm32)).unwrap();
    assert_eq!(registry.resolve(Channel::Ch1), Err(RegistryError::UnmappedChannel));
    assert_eq!(registry.resolve(Channel::Ch2), Ok((DeviceId::EXT1, InternalChannel::One)));
    assert_eq!(registry.device(DeviceId::EXT1).unwrap().channel_mask(), 0b0010);

    // An emptied slot keeps no channel
    registry.configure(DeviceId::ext(2), DeviceConfig::default()).unwrap();
    assert_eq!(registry.resolve(Channel::Ch3), Err(RegistryError::UnmappedChannel));
    assert_eq!(registry.device(DeviceId::ext(2)).unwrap().channel_mask(), 0);
    assert_eq!(registry.resolve(Channel::Ch2), Ok((DeviceId::EXT1, InternalChannel::One)));
}
