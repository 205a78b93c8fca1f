/// the dspam statistical filter.
pub mod dspam;

/// the bogofilter bayesian filter.
pub mod bogofilter;

/// spamassassin through its spamc client.
pub mod spamassassin;

/// the clamav antivirus scanner.
pub mod clamav;
