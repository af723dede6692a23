fn main() {
    rbx_player_count_lib::app::run();
}
