use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("ordercore"));
    cmd.arg("tests/fixtures/journal.csv")
        .arg("--tenants")
        .arg("tests/fixtures/tenants.json");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "tenant,order,state,currency,subtotal,discount,tax,shipping,total,captured,refunded",
        ))
        .stdout(predicate::str::contains(
            ",partially_refunded,USD,100,10,5,0,95,95,40",
        ))
        // Two mugs, the payment row asked for the wrong amount
        .stdout(predicate::str::contains(",pending_payment,USD,25,0,1.25,0,26.25,0,0"))
        .stdout(predicate::str::contains(",paid,EUR,80,0,0,4.9,84.9,84.9,0"))
        .stderr(predicate::str::contains("Error applying journal row 9"))
        .stderr(predicate::str::contains("Amount mismatch"));

    Ok(())
}

#[test]
fn test_cli_skips_bad_rows() {
    let mut journal = tempfile::NamedTempFile::new().unwrap();
    writeln!(journal, "op,tenant,credential,order,payment,sku,quantity,amount,coupon,key").unwrap();
    writeln!(journal, "create,acme,tok-alice,o1,,course,1,,,").unwrap();
    writeln!(journal, "teleport,acme,tok-alice,o1").unwrap();
    writeln!(journal, "submit,initech,tok-alice,o1").unwrap();
    writeln!(journal, "submit,acme,tok-forged,o1").unwrap();
    writeln!(journal, "preauthorize,acme,tok-alice,o1,p1,,,not_a_number,,k").unwrap();
    writeln!(journal, "submit,acme,tok-alice,o1").unwrap();

    let mut cmd = Command::new(cargo_bin!("ordercore"));
    cmd.arg(journal.path())
        .arg("--tenants")
        .arg("tests/fixtures/tenants.json");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading journal row 2"))
        .stderr(predicate::str::contains("Error applying journal row 3"))
        .stderr(predicate::str::contains("Error applying journal row 4"))
        .stderr(predicate::str::contains("Error reading journal row 5"))
        .stdout(predicate::str::contains(",pending_payment,USD,100,0,5,0,105,0,0"));
}

#[test]
fn test_cli_requires_tenants() {
    let mut cmd = Command::new(cargo_bin!("ordercore"));
    cmd.arg("tests/fixtures/journal.csv");
    cmd.assert().failure();

    let mut cmd = Command::new(cargo_bin!("ordercore"));
    cmd.arg("tests/fixtures/journal.csv")
        .arg("--tenants")
        .arg("tests/fixtures/missing.json");
    cmd.assert().failure();
}
