pub mod load;
pub mod state;
pub mod update;

use serde::Serialize;

/// Result and input file locations recorded on a job. `None` leaves the
/// stored value unchanged on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobPaths {
    pub output_hdf4_file: Option<String>,
    pub output_hdf5_struct_file: Option<String>,
    pub output_hdf5_chem_file: Option<String>,
    pub output_textout_file: Option<String>,
    pub output_chemchk_file: Option<String>,
    pub output_mcdrt_zip_file: Option<String>,
    pub output_ctrl_ind_file: Option<String>,
    pub input_pdrnew_inp_file: Option<String>,
    pub input_json_file: Option<String>,
    pub log_file: Option<String>,
}

impl JobPaths {
    pub(crate) const COLUMNS: [&'static str; 10] = [
        "output_hdf4_file",
        "output_hdf5_struct_file",
        "output_hdf5_chem_file",
        "output_textout_file",
        "output_chemchk_file",
        "output_mcdrt_zip_file",
        "output_ctrl_ind_file",
        "input_pdrnew_inp_file",
        "input_json_file",
        "log_file",
    ];

    /// Values in [`JobPaths::COLUMNS`] order
    pub(crate) fn values(&self) -> [Option<&str>; 10] {
        [
            self.output_hdf4_file.as_deref(),
            self.output_hdf5_struct_file.as_deref(),
            self.output_hdf5_chem_file.as_deref(),
            self.output_textout_file.as_deref(),
            self.output_chemchk_file.as_deref(),
            self.output_mcdrt_zip_file.as_deref(),
            self.output_ctrl_ind_file.as_deref(),
            self.input_pdrnew_inp_file.as_deref(),
            self.input_json_file.as_deref(),
            self.log_file.as_deref(),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.values().iter().all(Option::is_none)
    }
}
