//! Customer-facing payment steps per instrument.

/// ATM / mobile banking steps for a virtual account.
pub fn virtual_account(bank: &str, number: &str) -> Vec<String> {
    let (app, menu) = match bank {
        "BRI" => ("BRImo or BRI Internet Banking", "Payment > BRIVA"),
        "BCA" => ("BCA mobile or KlikBCA", "m-Transfer > BCA Virtual Account"),
        "MANDIRI" => ("Livin' by Mandiri", "Pay > Multipayment"),
        "BNI" => ("BNI Mobile Banking", "Payment > Virtual Account"),
        "PERMATA" => ("PermataMobile X", "Payment > Virtual Account"),
        "BSI" => ("BSI Mobile", "Payment > Virtual Account"),
        "CIMB" => ("OCTO Mobile", "Transfer > Virtual Account"),
        _ => ("your mobile banking app", "Transfer > Virtual Account"),
    };
    vec![
        format!("1. Open {}", app),
        format!("2. Choose {}", menu),
        format!("3. Enter virtual account number {}", number),
        "4. Check the payment details".to_string(),
        "5. Enter your PIN to complete the payment".to_string(),
    ]
}

pub fn qr() -> Vec<String> {
    vec![
        "1. Open a banking or e-wallet app that supports QRIS".to_string(),
        "2. Choose Scan QR".to_string(),
        "3. Scan the code shown and confirm the amount".to_string(),
        "4. Enter your PIN to complete the payment".to_string(),
    ]
}

pub fn retail(store: &str, code: &str) -> Vec<String> {
    let store = match store {
        "ALFAMART" => "Alfamart",
        "INDOMARET" => "Indomaret",
        other => other,
    };
    vec![
        format!("1. Visit the nearest {} store", store),
        "2. Tell the cashier you want to make a payment".to_string(),
        format!("3. Show payment code {}", code),
        "4. Pay the exact amount shown".to_string(),
        "5. Keep the receipt as proof of payment".to_string(),
    ]
}

pub fn redirect(app: &str) -> Vec<String> {
    vec![
        format!("1. Tap Pay to open {}", app),
        "2. Log in and check the transaction details".to_string(),
        "3. Confirm and enter your PIN".to_string(),
    ]
}
