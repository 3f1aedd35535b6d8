use diskvault_core::error::VaultError;
use diskvault_core::VaultConfig;
use diskvault_host::SystemHostProvider;
use diskvault_provider::CryptoProvider;
use std::path::Path;

#[test]
fn system_provider_constructs_or_names_the_missing_tool() {
    let config = VaultConfig::default();
    match SystemHostProvider::from_config(&config) {
        Ok(_) => {}
        Err(VaultError::InvalidConfig(message)) => {
            assert!(
                message.contains("unable to locate"),
                "unexpected construction failure: {message}"
            );
        }
        Err(other) => panic!("unexpected error variant: {other:?}"),
    }
}

#[test]
fn device_nodes_live_under_dev_mapper() {
    let config = VaultConfig::default();
    let Ok(provider) = SystemHostProvider::from_config(&config) else {
        // Host tooling not installed; construction coverage lives above.
        return;
    };
    assert_eq!(
        provider.device_node("diskvault-ks"),
        Path::new("/dev/mapper/diskvault-ks")
    );
}
