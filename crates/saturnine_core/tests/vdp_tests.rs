pub mod vdp_tests {
    pub mod setup;

    mod phase;
    mod vdp1;
    mod vdp2;
}
