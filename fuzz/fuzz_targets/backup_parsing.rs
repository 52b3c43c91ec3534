#![no_main]

use libfuzzer_sys::fuzz_target;
use relay_ratchet::BackupArtifact;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(artifact) = BackupArtifact::from_json(json) {
        let reparsed = BackupArtifact::from_json(&artifact.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, artifact);
    }
});
